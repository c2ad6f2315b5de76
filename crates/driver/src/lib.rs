//! The `toolwire` driver: CLI surface, interactive chat loop and the
//! engine/tool turn loop that ties a completion engine to a worker session.

pub mod cli;
pub mod runtime;
