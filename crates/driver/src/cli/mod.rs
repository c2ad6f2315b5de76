pub mod chat;
pub mod config;
pub mod doctor;

use anyhow::Context;
use clap::{Parser, Subcommand};

use tw_domain::config::Config;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TOOLWIRE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "toolwire.toml";

/// toolwire: drive a stdio tool worker from a language model.
#[derive(Debug, Parser)]
#[command(name = "toolwire", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactive chat backed by the worker's tools (default).
    Chat,
    /// Spawn the worker, handshake, ping it and tear it down.
    Doctor {
        /// Number of liveness pings to send after the handshake.
        #[arg(long, default_value_t = 3)]
        pings: u32,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any issues.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from `TOOLWIRE_CONFIG` (or `toolwire.toml`).
/// A missing file yields the defaults. `LM_STUDIO_*` overrides are
/// applied last.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path =
        std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut config = load_config_from(&config_path)?;
    config.llm.apply_env_overrides();
    Ok((config, config_path))
}

/// Parse `path`, falling back to defaults when it does not exist.
pub fn load_config_from(path: &str) -> anyhow::Result<Config> {
    if !std::path::Path::new(path).exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    toml::from_str(&raw).with_context(|| format!("parsing {path}"))
}
