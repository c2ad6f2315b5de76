//! Turns a batch of tool call intents into tool result records.
//!
//! Calls run one after another over the session's channel. A failing call
//! only affects its own record; once the session is gone every remaining
//! intent gets the "Session unavailable" record.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tw_domain::tool::{CallStyle, Message, ToolCall};

use crate::error::McpError;
use crate::protocol::ToolCallResult;
use crate::session::Session;
use crate::state::SessionState;
use crate::tools::ToolRegistry;

pub const SESSION_UNAVAILABLE: &str = "Session unavailable";

/// Outcome of one tool call, keyed by the engine's call id.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResultRecord {
    pub call_id: String,
    pub tool_name: String,
    pub outcome: Result<Value, String>,
}

impl ToolResultRecord {
    fn new(intent: &ToolCall, outcome: Result<Value, String>) -> Self {
        Self {
            call_id: intent.call_id.clone(),
            tool_name: intent.tool_name.clone(),
            outcome,
        }
    }

    fn unavailable(intent: &ToolCall) -> Self {
        Self::new(intent, Err(SESSION_UNAVAILABLE.into()))
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    /// The result value, or `{"error": "<text>"}` for failures.
    pub fn content(&self) -> Value {
        match &self.outcome {
            Ok(value) => value.clone(),
            Err(message) => json!({ "error": message }),
        }
    }

    /// Role-tagged conversation entry for the next completion turn.
    pub fn to_message(&self) -> Message {
        Message::tool_result(
            self.call_id.clone(),
            self.content().to_string(),
            self.is_error(),
        )
    }
}

pub struct ToolDispatcher {
    session: Arc<Session>,
    registry: Arc<ToolRegistry>,
}

impl ToolDispatcher {
    pub fn new(session: Arc<Session>, registry: Arc<ToolRegistry>) -> Self {
        Self { session, registry }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Dispatch every intent in order and return one record per intent.
    pub async fn dispatch(&self, intents: &[ToolCall]) -> Vec<ToolResultRecord> {
        let state = self.session.state();
        if state != SessionState::Ready {
            tracing::warn!(%state, count = intents.len(), "session not ready, failing tool calls");
            return intents.iter().map(ToolResultRecord::unavailable).collect();
        }

        let mut records = Vec::with_capacity(intents.len());
        let mut session_alive = true;
        for intent in intents {
            if !session_alive {
                records.push(ToolResultRecord::unavailable(intent));
                continue;
            }

            let started = Instant::now();
            let outcome = self.dispatch_one(intent).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &outcome {
                Ok(_) => tracing::info!(
                    call_id = %intent.call_id,
                    tool = %intent.tool_name,
                    elapsed_ms,
                    "tool call succeeded"
                ),
                Err(e) => {
                    tracing::warn!(
                        call_id = %intent.call_id,
                        tool = %intent.tool_name,
                        elapsed_ms,
                        error = %e,
                        "tool call failed"
                    );
                    session_alive = !e.is_session_fatal();
                }
            }
            records.push(ToolResultRecord::new(intent, outcome.map_err(|e| e.to_string())));
        }
        records
    }

    /// Validate, send and await a single intent.
    pub async fn dispatch_one(&self, intent: &ToolCall) -> Result<Value, McpError> {
        let descriptor = self
            .registry
            .check_call(&intent.tool_name, &intent.arguments)?;
        let timeout = self.session.config().call_timeout();

        match descriptor.call_style {
            CallStyle::Direct => {
                self.session
                    .request(&intent.tool_name, intent.arguments.clone(), timeout)
                    .await
            }
            CallStyle::ToolsCall => {
                let params = json!({
                    "name": intent.tool_name,
                    "arguments": intent.arguments,
                });
                let raw = self
                    .session
                    .request("tools/call", params, timeout)
                    .await
                    .map_err(|e| match e {
                        McpError::ToolError { message, detail, .. } => McpError::ToolError {
                            tool: intent.tool_name.clone(),
                            message,
                            detail,
                        },
                        other => other,
                    })?;
                unwrap_tools_call(&intent.tool_name, raw)
            }
        }
    }
}

/// Unwrap an MCP `{content, isError}` result. Text content that parses as
/// JSON is returned as JSON. Results of any other shape pass through.
fn unwrap_tools_call(tool: &str, raw: Value) -> Result<Value, McpError> {
    let Ok(result) = serde_json::from_value::<ToolCallResult>(raw.clone()) else {
        return Ok(raw);
    };
    let text = result.text();
    if result.is_error {
        return Err(McpError::ToolError {
            tool: tool.to_string(),
            message: text,
            detail: Some(raw),
        });
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tw_domain::config::{default_tools, WorkerConfig};
    use tw_domain::tool::{ContentPart, MessageContent, Role};

    fn intent(id: &str, tool: &str, args: Value) -> ToolCall {
        ToolCall {
            call_id: id.into(),
            tool_name: tool.into(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn unstarted_session_fails_every_intent() {
        let session = Arc::new(Session::new(WorkerConfig::default()));
        let registry = Arc::new(ToolRegistry::new(default_tools()).unwrap());
        let dispatcher = ToolDispatcher::new(session, registry);

        let records = dispatcher
            .dispatch(&[
                intent("a", "search", json!({"query": "x"})),
                intent("b", "search", json!({"query": "y"})),
            ])
            .await;
        assert_eq!(records.len(), 2);
        for (record, id) in records.iter().zip(["a", "b"]) {
            assert_eq!(record.call_id, id);
            assert_eq!(record.content(), json!({"error": "Session unavailable"}));
        }
    }

    #[test]
    fn record_renders_tool_message() {
        let record = ToolResultRecord {
            call_id: "call_1".into(),
            tool_name: "search".into(),
            outcome: Ok(json!({"hits": []})),
        };
        let msg = record.to_message();
        assert_eq!(msg.role, Role::Tool);
        match msg.content {
            MessageContent::Parts(parts) => match &parts[0] {
                ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    assert_eq!(tool_use_id, "call_1");
                    assert_eq!(content, r#"{"hits":[]}"#);
                    assert!(!is_error);
                }
                other => panic!("unexpected part {other:?}"),
            },
            MessageContent::Text(_) => panic!("expected parts"),
        }
    }

    #[test]
    fn error_record_wraps_message() {
        let record = ToolResultRecord {
            call_id: "c".into(),
            tool_name: "search".into(),
            outcome: Err("search timed out after 20000ms".into()),
        };
        assert!(record.is_error());
        assert_eq!(
            record.content(),
            json!({"error": "search timed out after 20000ms"})
        );
    }

    #[test]
    fn tools_call_text_json_is_parsed() {
        let raw = json!({"content": [{"type": "text", "text": "{\"hits\":[]}"}]});
        assert_eq!(unwrap_tools_call("search", raw).unwrap(), json!({"hits": []}));
    }

    #[test]
    fn tools_call_plain_text_stays_string() {
        let raw = json!({"content": [{"type": "text", "text": "sunny"}], "isError": false});
        assert_eq!(unwrap_tools_call("weather", raw).unwrap(), json!("sunny"));
    }

    #[test]
    fn tools_call_is_error_becomes_tool_error() {
        let raw = json!({"content": [{"type": "text", "text": "not found"}], "isError": true});
        let err = unwrap_tools_call("weather", raw).unwrap_err();
        assert!(matches!(err, McpError::ToolError { ref message, .. } if message == "not found"));
    }

    #[test]
    fn other_result_shapes_pass_through() {
        let raw = json!({"hits": [1, 2]});
        assert_eq!(unwrap_tools_call("search", raw.clone()).unwrap(), raw);
    }
}
