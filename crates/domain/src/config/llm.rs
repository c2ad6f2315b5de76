use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Completion engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// OpenAI-compatible completion endpoint (LM Studio, Ollama, vLLM, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL up to and including `/v1`.
    /// Overridden by `LM_STUDIO_ENDPOINT` when set.
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Overridden by `LM_STUDIO_MODEL` when set.
    #[serde(default = "d_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Plaintext API key. Local servers accept any value.
    #[serde(default = "d_api_key")]
    pub api_key: String,
    #[serde(default = "d_120000")]
    pub timeout_ms: u64,
    /// Upper bound on engine → tools → engine rounds within one user turn.
    #[serde(default = "d_8")]
    pub max_tool_rounds: u32,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            model: d_model(),
            api_key_env: None,
            api_key: d_api_key(),
            timeout_ms: 120_000,
            max_tool_rounds: 8,
            system_prompt: None,
        }
    }
}

impl LlmConfig {
    /// Apply `LM_STUDIO_ENDPOINT` / `LM_STUDIO_MODEL` overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("LM_STUDIO_ENDPOINT") {
            if !url.is_empty() {
                self.base_url = url;
            }
        }
        if let Ok(model) = std::env::var("LM_STUDIO_MODEL") {
            if !model.is_empty() {
                self.model = model;
            }
        }
    }

    /// Resolve the API key: `api_key_env` first, then the plaintext value.
    pub fn resolve_api_key(&self) -> String {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .unwrap_or_else(|| self.api_key.clone())
    }
}

fn d_base_url() -> String {
    "http://localhost:1234/v1".into()
}
fn d_model() -> String {
    "local-model".into()
}
fn d_api_key() -> String {
    "lm-studio".into()
}
fn d_120000() -> u64 {
    120_000
}
fn d_8() -> u32 {
    8
}
