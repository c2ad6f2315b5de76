//! Line codec for the worker protocol.
//!
//! Every message is one compact JSON object terminated by `\n`. Requests
//! carry a correlation id; responses carry the same id and exactly one of
//! `result` or `error`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::McpError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Longest slice of an offending line kept in a `MalformedLine` error.
const MAX_LINE_EXCERPT: usize = 200;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestEnvelope {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl RequestEnvelope {
    /// Build a request. `params` must be a JSON object or `null` (sent as `{}`).
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Result<Self, McpError> {
        let method = method.into();
        let params = match params {
            Value::Null => Value::Object(Map::new()),
            Value::Object(map) => Value::Object(map),
            other => {
                return Err(McpError::Protocol(format!(
                    "params for '{method}' must be an object, got {}",
                    json_type(&other)
                )))
            }
        };
        Ok(Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            method,
            params,
        })
    }

    /// Single-line wire form, without the trailing newline.
    pub fn encode(&self) -> Result<String, McpError> {
        serde_json::to_string(self)
            .map_err(|e| McpError::Protocol(format!("failed to encode '{}': {e}", self.method)))
    }
}

/// Build and encode a request in one step.
pub fn encode_request(id: u64, method: &str, params: Value) -> Result<String, McpError> {
    RequestEnvelope::new(id, method, params)?.encode()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Error description returned by the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub message: String,
    /// The structured error value, when the worker sent more than a string.
    pub detail: Option<Value>,
}

impl RemoteError {
    fn from_value(value: Value) -> Self {
        match value {
            Value::String(message) => Self {
                message,
                detail: None,
            },
            Value::Object(ref map) => {
                let message = match map.get("message") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => value.to_string(),
                };
                Self {
                    message,
                    detail: Some(value),
                }
            }
            other => Self {
                message: other.to_string(),
                detail: Some(other),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Success(Value),
    Error(RemoteError),
}

/// A decoded response, correlated to exactly one request id.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub id: u64,
    pub outcome: ResponseOutcome,
}

impl ResponseEnvelope {
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ResponseOutcome::Error(_))
    }

    pub fn into_result(self) -> Result<Value, RemoteError> {
        match self.outcome {
            ResponseOutcome::Success(v) => Ok(v),
            ResponseOutcome::Error(e) => Err(e),
        }
    }
}

/// Decode one line from the worker's stdout.
///
/// Anything that is not a well-formed response comes back as
/// [`McpError::MalformedLine`]; callers skip it and keep reading.
pub fn decode_line(line: &str) -> Result<ResponseEnvelope, McpError> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return Err(malformed("not a JSON object", trimmed));
    }

    let value: Value =
        serde_json::from_str(trimmed).map_err(|e| malformed(&format!("invalid JSON: {e}"), trimmed))?;
    let Value::Object(mut obj) = value else {
        return Err(malformed("not a JSON object", trimmed));
    };

    let id = match obj.get("id") {
        Some(v) => v
            .as_u64()
            .ok_or_else(|| malformed("id is not a non-negative integer", trimmed))?,
        None => return Err(malformed("missing id", trimmed)),
    };

    let outcome = match (obj.remove("result"), obj.remove("error")) {
        (Some(_), Some(_)) => return Err(malformed("both result and error present", trimmed)),
        (None, None) => return Err(malformed("neither result nor error present", trimmed)),
        (None, Some(err)) => ResponseOutcome::Error(RemoteError::from_value(err)),
        (Some(result), None) => normalize_result(result),
    };

    Ok(ResponseEnvelope { id, outcome })
}

/// Some workers report failures as `{"result": {"error": ...}}`. Treat a
/// non-null top-level `error` key inside an object result as an error
/// response whose detail is the whole result object.
fn normalize_result(result: Value) -> ResponseOutcome {
    let nested = match &result {
        Value::Object(map) => map.get("error").filter(|e| !e.is_null()).cloned(),
        _ => None,
    };
    match nested {
        Some(err) => {
            let message = match err {
                Value::String(s) => s,
                Value::Object(ref m) => match m.get("message") {
                    Some(Value::String(s)) => s.clone(),
                    _ => err.to_string(),
                },
                other => other.to_string(),
            };
            ResponseOutcome::Error(RemoteError {
                message,
                detail: Some(result),
            })
        }
        None => ResponseOutcome::Success(result),
    }
}

fn malformed(reason: &str, line: &str) -> McpError {
    let excerpt = match line.char_indices().nth(MAX_LINE_EXCERPT) {
        Some((idx, _)) => format!("{}...", &line[..idx]),
        None => line.to_string(),
    };
    McpError::MalformedLine {
        reason: reason.into(),
        line: excerpt,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handshake and MCP payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Parameters for the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

pub fn initialize_params(protocol_version: &str, client_name: &str) -> InitializeParams {
    InitializeParams {
        protocol_version: protocol_version.into(),
        capabilities: serde_json::json!({}),
        client_info: ClientInfo {
            name: client_name.into(),
            version: env!("CARGO_PKG_VERSION").into(),
        },
    }
}

/// A single content item in a `tools/call` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
}

/// The result payload from `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub content: Vec<ToolCallContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Concatenated text content.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
