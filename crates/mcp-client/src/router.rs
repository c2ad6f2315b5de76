//! Pending-request table.
//!
//! Each outgoing request registers a oneshot slot under a fresh id before
//! its line is written; the reader task resolves the slot when the matching
//! response arrives. A slot leaves the table exactly once: through its
//! response, through [`Router::cancel`] after the waiter timed out, or
//! through [`Router::fail_all`].

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::McpError;
use crate::protocol::ResponseEnvelope;

pub type ResponseSlot = oneshot::Receiver<Result<ResponseEnvelope, McpError>>;

struct RouterInner {
    next_id: u64,
    pending: HashMap<u64, oneshot::Sender<Result<ResponseEnvelope, McpError>>>,
    /// Set by the first `fail_all`; the router accepts no new requests after.
    closed: Option<McpError>,
}

pub struct Router {
    inner: Mutex<RouterInner>,
    closed_token: CancellationToken,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RouterInner {
                next_id: 1,
                pending: HashMap::new(),
                closed: None,
            }),
            closed_token: CancellationToken::new(),
        }
    }

    /// Reserve a fresh id and register its slot.
    ///
    /// Fails with the recorded close reason once the router is closed.
    pub fn allocate_id(&self) -> Result<(u64, ResponseSlot), McpError> {
        let mut inner = self.inner.lock();
        if let Some(reason) = &inner.closed {
            return Err(reason.clone());
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let (tx, rx) = oneshot::channel();
        inner.pending.insert(id, tx);
        Ok((id, rx))
    }

    /// Hand a response to the waiter registered under its id.
    ///
    /// Unknown ids (never issued, already resolved, or timed out) yield
    /// [`McpError::UnsolicitedResponse`] and leave the table untouched.
    pub fn resolve(&self, envelope: ResponseEnvelope) -> Result<(), McpError> {
        let id = envelope.id;
        let slot = self.inner.lock().pending.remove(&id);
        match slot {
            Some(tx) => {
                // The waiter may have given up between our removal and this send.
                if tx.send(Ok(envelope)).is_err() {
                    tracing::debug!(id, "waiter dropped before response was delivered");
                }
                Ok(())
            }
            None => Err(McpError::UnsolicitedResponse { id }),
        }
    }

    /// Drop the slot for `id`. Returns whether it was still pending.
    pub fn cancel(&self, id: u64) -> bool {
        self.inner.lock().pending.remove(&id).is_some()
    }

    /// Fail every pending request with `reason` and close the router.
    ///
    /// Only the first call has an effect; it returns the number of waiters
    /// it failed. Later calls return 0.
    pub fn fail_all(&self, reason: McpError) -> usize {
        let drained: Vec<_> = {
            let mut inner = self.inner.lock();
            if inner.closed.is_some() {
                return 0;
            }
            inner.closed = Some(reason.clone());
            inner.pending.drain().collect()
        };
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(reason.clone()));
        }
        self.closed_token.cancel();
        tracing::debug!(failed = count, reason = %reason, "router closed");
        count
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed.is_some()
    }

    pub fn close_reason(&self) -> Option<McpError> {
        self.inner.lock().closed.clone()
    }

    /// Cancelled once the router has been closed by `fail_all`.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed_token.clone()
    }
}
