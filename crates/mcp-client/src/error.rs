//! Error taxonomy for the worker channel.

use serde_json::Value;

use crate::state::SessionState;

/// Everything that can go wrong between the client and its worker.
///
/// `Clone` so a single session-fatal failure can be handed to every
/// pending waiter by [`Router::fail_all`](crate::router::Router::fail_all).
#[derive(Debug, Clone, thiserror::Error)]
pub enum McpError {
    /// The worker's stdio is gone (exit, EOF, broken pipe). Session-fatal.
    #[error("transport closed: {reason}")]
    TransportClosed {
        reason: String,
        /// Trailing worker stderr captured at the time of closure.
        stderr: String,
    },

    #[error("{operation} timed out after {timeout_ms}ms")]
    TransportTimeout { operation: String, timeout_ms: u64 },

    #[error("malformed line ({reason}): {line}")]
    MalformedLine { reason: String, line: String },

    #[error("unsolicited response for id {id}")]
    UnsolicitedResponse { id: u64 },

    /// The worker answered with an error description.
    #[error("{tool}: {message}")]
    ToolError {
        tool: String,
        message: String,
        detail: Option<Value>,
    },

    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    #[error("failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("session unavailable ({0})")]
    SessionUnavailable(SessionState),

    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl McpError {
    pub fn closed(reason: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::TransportClosed {
            reason: reason.into(),
            stderr: stderr.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::TransportTimeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Whether this failure means the session can no longer serve requests.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::TransportClosed { .. }
                | Self::InitializationFailed(_)
                | Self::SpawnFailed(_)
                | Self::SessionUnavailable(_)
        )
    }

    /// Worker stderr attached to the failure, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::TransportClosed { stderr, .. } if !stderr.is_empty() => Some(stderr),
            _ => None,
        }
    }
}
