//! Worker process configuration: how to launch the tool executor and the
//! timeouts that bound every protocol operation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for the spawned worker process (the `[worker]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// The command to spawn (e.g. `"tw-search-worker"`).
    #[serde(default = "d_command")]
    pub command: String,

    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the worker. Inherits ours when unset.
    #[serde(default)]
    pub cwd: Option<String>,

    /// Extra environment variables for the worker (e.g. a search endpoint).
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Line the worker prints on stderr once it is ready to accept requests.
    /// When unset, the handshake starts right after the startup grace period.
    #[serde(default)]
    pub ready_banner: Option<String>,

    /// How long the worker must survive after spawn before it counts as started.
    #[serde(default = "d_500")]
    pub startup_grace_ms: u64,

    /// Upper bound on waiting for `ready_banner`.
    #[serde(default = "d_10000")]
    pub ready_timeout_ms: u64,

    #[serde(default = "d_20000")]
    pub init_timeout_ms: u64,

    /// Per tool call timeout.
    #[serde(default = "d_20000")]
    pub call_timeout_ms: u64,

    #[serde(default = "d_10000")]
    pub ping_timeout_ms: u64,

    /// Liveness ping interval. `0` disables the monitor.
    #[serde(default = "d_15000")]
    pub ping_interval_ms: u64,

    /// Grace period between SIGTERM and a forced kill.
    #[serde(default = "d_5000")]
    pub shutdown_grace_ms: u64,

    /// Send a `ping` right after `initialize` and fail the handshake if it
    /// does not succeed.
    #[serde(default = "d_true")]
    pub verify_ping: bool,

    /// Protocol version announced in `initialize`.
    #[serde(default = "d_protocol_version")]
    pub protocol_version: String,

    /// Client name announced in `initialize`.
    #[serde(default = "d_client_name")]
    pub client_name: String,

    /// How much trailing worker stderr to keep for diagnostics.
    #[serde(default = "d_8192")]
    pub stderr_tail_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: d_command(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            ready_banner: None,
            startup_grace_ms: 500,
            ready_timeout_ms: 10_000,
            init_timeout_ms: 20_000,
            call_timeout_ms: 20_000,
            ping_timeout_ms: 10_000,
            ping_interval_ms: 15_000,
            shutdown_grace_ms: 5_000,
            verify_ping: true,
            protocol_version: d_protocol_version(),
            client_name: d_client_name(),
            stderr_tail_bytes: 8192,
        }
    }
}

impl WorkerConfig {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
    /// `None` when the liveness monitor is disabled.
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_ms > 0).then(|| Duration::from_millis(self.ping_interval_ms))
    }
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn d_command() -> String {
    "tw-search-worker".into()
}
fn d_protocol_version() -> String {
    "0.1.0".into()
}
fn d_client_name() -> String {
    "toolwire".into()
}
fn d_true() -> bool {
    true
}
fn d_500() -> u64 {
    500
}
fn d_5000() -> u64 {
    5_000
}
fn d_10000() -> u64 {
    10_000
}
fn d_15000() -> u64 {
    15_000
}
fn d_20000() -> u64 {
    20_000
}
fn d_8192() -> usize {
    8192
}
