mod llm;
mod logging;
mod tools;
mod worker;

pub use llm::*;
pub use logging::*;
pub use tools::*;
pub use worker::*;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tool::ToolDescriptor;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Tools the worker exposes (`[[tools]]`).
    #[serde(default = "default_tools")]
    pub tools: Vec<ToolDescriptor>,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            tools: default_tools(),
            llm: LlmConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut push = |severity, field: &str, message: String| {
            errors.push(ConfigError {
                severity,
                field: field.into(),
                message,
            });
        };

        if self.worker.command.trim().is_empty() {
            push(
                ConfigSeverity::Error,
                "worker.command",
                "command must not be empty".into(),
            );
        }

        for (field, value) in [
            ("worker.init_timeout_ms", self.worker.init_timeout_ms),
            ("worker.call_timeout_ms", self.worker.call_timeout_ms),
            ("worker.ping_timeout_ms", self.worker.ping_timeout_ms),
        ] {
            if value == 0 {
                push(
                    ConfigSeverity::Error,
                    field,
                    "timeout must be greater than 0".into(),
                );
            }
        }

        if self.worker.ping_interval_ms == 0 {
            push(
                ConfigSeverity::Warning,
                "worker.ping_interval_ms",
                "liveness monitor disabled; a hung worker is only noticed on the next call".into(),
            );
        } else if self.worker.ping_interval_ms < self.worker.ping_timeout_ms {
            push(
                ConfigSeverity::Warning,
                "worker.ping_interval_ms",
                "interval is shorter than ping_timeout_ms; pings may pile up behind slow calls"
                    .into(),
            );
        }

        if self.worker.ready_banner.as_deref().is_some_and(|b| b.trim().is_empty()) {
            push(
                ConfigSeverity::Error,
                "worker.ready_banner",
                "ready_banner must not be blank when set".into(),
            );
        }

        let mut names = std::collections::HashSet::new();
        for (i, tool) in self.tools.iter().enumerate() {
            if let Err(reason) = tool.validate() {
                push(ConfigSeverity::Error, &format!("tools[{i}]"), reason);
            }
            if !names.insert(tool.name.as_str()) {
                push(
                    ConfigSeverity::Error,
                    &format!("tools[{i}].name"),
                    format!("duplicate tool name '{}'", tool.name),
                );
            }
            if matches!(tool.name.as_str(), "initialize" | "ping") {
                push(
                    ConfigSeverity::Error,
                    &format!("tools[{i}].name"),
                    format!("'{}' is a reserved protocol method", tool.name),
                );
            }
        }
        if self.tools.is_empty() {
            push(
                ConfigSeverity::Warning,
                "tools",
                "no tools configured; the model cannot call the worker".into(),
            );
        }

        if self.llm.base_url.is_empty() {
            push(
                ConfigSeverity::Error,
                "llm.base_url",
                "base_url must not be empty".into(),
            );
        }
        if self.llm.max_tool_rounds == 0 {
            push(
                ConfigSeverity::Error,
                "llm.max_tool_rounds",
                "max_tool_rounds must be greater than 0".into(),
            );
        }

        errors
    }
}
