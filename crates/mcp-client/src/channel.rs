//! The shared request/response cycle.
//!
//! A [`Channel`] ties the transport's serialized writer to the router and
//! runs the single reader task that owns the worker's stdout. The session
//! supervisor, the liveness monitor and the dispatcher all send through it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::McpError;
use crate::protocol::{decode_line, encode_request, ResponseEnvelope};
use crate::router::Router;
use crate::transport::{LineReader, Transport};

pub struct Channel {
    transport: Arc<Transport>,
    router: Arc<Router>,
    reader_cancel: CancellationToken,
    reader_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Channel {
    /// Start the reader task. `idle_probe` bounds each stdout read; when it
    /// elapses without a line the reader checks whether the worker is alive.
    pub fn start(transport: Arc<Transport>, reader: LineReader, idle_probe: Duration) -> Self {
        let router = Arc::new(Router::new());
        let reader_cancel = CancellationToken::new();
        let task = tokio::spawn(read_loop(
            reader,
            Arc::clone(&transport),
            Arc::clone(&router),
            reader_cancel.clone(),
            idle_probe,
        ));
        Self {
            transport,
            router,
            reader_cancel,
            reader_task: parking_lot::Mutex::new(Some(task)),
        }
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Send one request and wait up to `timeout` for its response.
    ///
    /// Error responses come back as `Ok` envelopes; `Err` is reserved for
    /// channel-level failures.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<ResponseEnvelope, McpError> {
        let (id, slot) = self.router.allocate_id()?;

        let line = match encode_request(id, method, params) {
            Ok(line) => line,
            Err(e) => {
                self.router.cancel(id);
                return Err(e);
            }
        };

        tracing::debug!(id, method, "sending request");
        if let Err(e) = self.transport.send(&line).await {
            self.router.cancel(id);
            if e.is_session_fatal() {
                self.router.fail_all(e.clone());
            }
            return Err(e);
        }

        match tokio::time::timeout(timeout, slot).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(self
                .router
                .close_reason()
                .unwrap_or_else(|| self.transport.closed_error("response slot dropped"))),
            Err(_) => {
                // A response arriving after this point is unsolicited.
                self.router.cancel(id);
                tracing::debug!(id, method, "request timed out");
                Err(McpError::timeout(method, timeout))
            }
        }
    }

    /// `ping` with its own timeout. An error response counts as failure.
    pub async fn ping(&self, timeout: Duration) -> Result<(), McpError> {
        let envelope = self.request("ping", Value::Null, timeout).await?;
        envelope.into_result().map(|_| ()).map_err(|e| McpError::ToolError {
            tool: "ping".into(),
            message: e.message,
            detail: e.detail,
        })
    }

    /// Stop the reader task without waiting for it.
    pub fn abort_reader(&self) {
        self.reader_cancel.cancel();
        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }
    }

    /// Stop the reader task and wait for it to finish.
    pub async fn stop_reader(&self) {
        self.reader_cancel.cancel();
        let task = self.reader_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "reader task panicked");
                }
            }
        }
    }
}

async fn read_loop(
    mut reader: LineReader,
    transport: Arc<Transport>,
    router: Arc<Router>,
    cancel: CancellationToken,
    idle_probe: Duration,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = reader.receive_line(idle_probe) => next,
        };

        match next {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                match decode_line(&line) {
                    Ok(envelope) => {
                        if let Err(e) = router.resolve(envelope) {
                            tracing::warn!(error = %e, "discarding response");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "skipping line from worker"),
                }
            }
            Err(McpError::TransportTimeout { .. }) => {
                if let Some(status) = transport.probe_exit().await {
                    // Stdout may still be held open by a grandchild.
                    transport.settle_stderr(Duration::from_millis(100)).await;
                    let err = transport.closed_error(format!("worker exited ({status})"));
                    tracing::warn!(error = %err, "worker exited while idle");
                    router.fail_all(err);
                    break;
                }
            }
            Err(e) => {
                if let Some(status) = transport.probe_exit().await {
                    tracing::warn!(%status, "worker exited");
                }
                transport.settle_stderr(Duration::from_millis(100)).await;
                let err = transport.closed_error(match &e {
                    McpError::TransportClosed { reason, .. } => reason.clone(),
                    other => other.to_string(),
                });
                tracing::warn!(error = %err, "worker channel closed");
                router.fail_all(err);
                break;
            }
        }
    }
    tracing::debug!("reader task finished");
}
