//! Session lifecycle state and the cell that enforces its legal edges.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::McpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unstarted,
    Spawning,
    Initializing,
    Ready,
    Terminating,
    Terminated,
    /// Absorbing: the worker never became ready.
    Failed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unstarted => "unstarted",
            Self::Spawning => "spawning",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        }
    }

    /// Legal lifecycle edges. `terminated` and `failed` have none.
    pub fn can_transition(self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Unstarted, Spawning)
                | (Spawning, Initializing)
                | (Spawning, Failed)
                | (Initializing, Ready)
                | (Initializing, Failed)
                | (Ready, Terminating)
                | (Ready, Terminated)
                | (Terminating, Terminated)
        )
    }

    pub fn is_final(self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, observable session state. Cloning yields another handle to the
/// same cell.
#[derive(Clone)]
pub struct StateCell {
    tx: Arc<watch::Sender<SessionState>>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Unstarted);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Move to `to`, rejecting edges the lifecycle does not allow.
    pub fn transition(&self, to: SessionState) -> Result<SessionState, McpError> {
        let mut from = self.get();
        let moved = self.tx.send_if_modified(|current| {
            from = *current;
            if current.can_transition(to) {
                *current = to;
                true
            } else {
                false
            }
        });
        if moved {
            tracing::debug!(from = %from, to = %to, "session state changed");
            Ok(from)
        } else {
            Err(McpError::Protocol(format!(
                "illegal session transition {from} -> {to}"
            )))
        }
    }

    /// Move to `to` only if the current state is `expected`.
    pub fn transition_from(&self, expected: SessionState, to: SessionState) -> bool {
        let moved = self.tx.send_if_modified(|current| {
            if *current == expected && expected.can_transition(to) {
                *current = to;
                true
            } else {
                false
            }
        });
        if moved {
            tracing::debug!(from = %expected, to = %to, "session state changed");
        }
        moved
    }
}
