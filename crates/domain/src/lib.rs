//! Shared types for the toolwire crates: the common error type, the
//! provider-agnostic conversation/tool model, and the TOML configuration.

pub mod config;
pub mod error;
pub mod tool;
