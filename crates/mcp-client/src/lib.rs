//! `tw-mcp-client`: the worker protocol core.
//!
//! This crate provides:
//! - A line codec for the JSON-RPC-style worker protocol.
//! - A stdio transport that owns one spawned worker and its streams.
//! - A router correlating responses to pending requests by id.
//! - A liveness monitor pinging the worker over the same channel.
//! - A tool dispatcher turning model tool calls into result records.
//! - A [`Session`] supervisor tying these together: spawn, handshake,
//!   monitoring and two-phase teardown.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tw_mcp_client::{Session, ToolDispatcher, ToolRegistry};
//!
//! let session = Arc::new(Session::new(config.worker.clone()));
//! session.start().await?;
//!
//! let registry = Arc::new(ToolRegistry::new(config.tools.clone())?);
//! let dispatcher = ToolDispatcher::new(Arc::clone(&session), registry);
//! let records = dispatcher.dispatch(&tool_calls).await;
//!
//! session.shutdown().await;
//! ```

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod liveness;
pub mod protocol;
pub mod router;
pub mod session;
pub mod state;
pub mod tools;
pub mod transport;

// Re-exports for convenience.
pub use config::WorkerConfig;
pub use dispatcher::{ToolDispatcher, ToolResultRecord, SESSION_UNAVAILABLE};
pub use error::McpError;
pub use liveness::MonitorState;
pub use session::Session;
pub use state::SessionState;
pub use tools::ToolRegistry;
