//! Turn execution loop.
//!
//! One user input becomes one turn: the engine is asked for a reply with
//! the registry's tool definitions attached; any requested tool calls are
//! dispatched to the worker and their records appended as tool messages;
//! then the engine is asked again, until it answers without tool calls or
//! the round cap is reached.

use serde_json::Value;

use tw_domain::tool::{Message, ToolCall};
use tw_mcp_client::{SessionState, ToolDispatcher};
use tw_providers::{ChatRequest, CompletionEngine};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events and results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Progress notifications emitted while a turn runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// The engine requested a tool call.
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },
    /// A tool call finished.
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },
    /// The round cap was hit before the engine stopped calling tools.
    RoundLimit { rounds: u32 },
}

#[derive(Debug, Clone)]
pub struct TurnOptions {
    pub max_tool_rounds: u32,
    pub model: Option<String>,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            max_tool_rounds: 8,
            model: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Final assistant text (the last text seen when the cap was hit).
    pub text: String,
    /// Number of engine calls made.
    pub rounds: u32,
    pub tool_calls: usize,
    pub hit_round_limit: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("completion engine: {0}")]
    Engine(#[from] tw_domain::error::Error),

    /// The worker session ended while the turn was running.
    #[error("worker session {state}")]
    SessionLost { state: SessionState, stderr: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one turn for `input`, appending every message it produces to
/// `history`.
pub async fn run_turn(
    engine: &dyn CompletionEngine,
    dispatcher: &ToolDispatcher,
    history: &mut Vec<Message>,
    input: &str,
    opts: &TurnOptions,
    on_event: &mut (dyn FnMut(TurnEvent) + Send),
) -> Result<TurnOutcome, TurnError> {
    ensure_session_alive(dispatcher)?;
    history.push(Message::user(input));
    let tools = dispatcher.registry().definitions();

    let mut last_text = String::new();
    let mut tool_calls = 0usize;
    let mut rounds = 0u32;

    loop {
        if rounds >= opts.max_tool_rounds.max(1) {
            tracing::warn!(rounds, "tool round limit reached, ending turn");
            on_event(TurnEvent::RoundLimit { rounds });
            return Ok(TurnOutcome {
                text: last_text,
                rounds,
                tool_calls,
                hit_round_limit: true,
            });
        }
        rounds += 1;

        let request = ChatRequest {
            messages: history.clone(),
            tools: tools.clone(),
            model: opts.model.clone(),
            ..Default::default()
        };
        let response = engine.chat(&request).await?;
        tracing::debug!(
            round = rounds,
            tool_calls = response.tool_calls.len(),
            finish_reason = ?response.finish_reason,
            "engine replied"
        );

        if !response.content.is_empty() {
            last_text = response.content.clone();
        }

        if response.tool_calls.is_empty() {
            history.push(Message::assistant(response.content.clone()));
            return Ok(TurnOutcome {
                text: response.content,
                rounds,
                tool_calls,
                hit_round_limit: false,
            });
        }

        history.push(Message::assistant_with_tools(
            response.content.clone(),
            &response.tool_calls,
        ));
        tool_calls += response.tool_calls.len();
        dispatch_round(dispatcher, history, &response.tool_calls, on_event).await?;
    }
}

async fn dispatch_round(
    dispatcher: &ToolDispatcher,
    history: &mut Vec<Message>,
    calls: &[ToolCall],
    on_event: &mut (dyn FnMut(TurnEvent) + Send),
) -> Result<(), TurnError> {
    for call in calls {
        on_event(TurnEvent::ToolCall {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            arguments: call.arguments.clone(),
        });
    }

    let records = dispatcher.dispatch(calls).await;
    for record in &records {
        on_event(TurnEvent::ToolResult {
            call_id: record.call_id.clone(),
            tool_name: record.tool_name.clone(),
            content: record.content().to_string(),
            is_error: record.is_error(),
        });
        history.push(record.to_message());
    }

    ensure_session_alive(dispatcher)
}

/// Fail with [`TurnError::SessionLost`] once the worker session has ended,
/// whether it died mid-batch or while the conversation was idle.
pub fn ensure_session_alive(dispatcher: &ToolDispatcher) -> Result<(), TurnError> {
    let session = dispatcher.session();
    let state = session.state();
    if state.is_final() {
        return Err(TurnError::SessionLost {
            state,
            stderr: session.stderr_tail(),
        });
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tw_domain::config::{default_tools, WorkerConfig};
    use tw_domain::error::{Error, Result};
    use tw_domain::tool::{MessageContent, Role};
    use tw_mcp_client::{Session, ToolRegistry, SESSION_UNAVAILABLE};
    use tw_providers::ChatResponse;

    /// Engine that always asks for the same tool call.
    struct LoopingEngine;

    #[async_trait::async_trait]
    impl CompletionEngine for LoopingEngine {
        async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
            Ok(ChatResponse {
                content: format!("round with {} messages", req.messages.len()),
                tool_calls: vec![ToolCall {
                    call_id: format!("call_{}", req.messages.len()),
                    tool_name: "search".into(),
                    arguments: serde_json::json!({"query": "again"}),
                }],
                ..Default::default()
            })
        }
        fn engine_id(&self) -> &str {
            "looping"
        }
    }

    struct FailingEngine;

    #[async_trait::async_trait]
    impl CompletionEngine for FailingEngine {
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse> {
            Err(Error::Http("connection refused".into()))
        }
        fn engine_id(&self) -> &str {
            "failing"
        }
    }

    fn unstarted_dispatcher() -> ToolDispatcher {
        let session = Arc::new(Session::new(WorkerConfig::default()));
        let registry = Arc::new(ToolRegistry::new(default_tools()).unwrap());
        ToolDispatcher::new(session, registry)
    }

    #[tokio::test]
    async fn round_cap_returns_last_text() {
        let dispatcher = unstarted_dispatcher();
        let mut history = Vec::new();
        let mut events = Vec::new();
        let opts = TurnOptions {
            max_tool_rounds: 2,
            model: None,
        };

        let outcome = run_turn(
            &LoopingEngine,
            &dispatcher,
            &mut history,
            "hello",
            &opts,
            &mut |e| events.push(e),
        )
        .await
        .unwrap();

        assert!(outcome.hit_round_limit);
        assert_eq!(outcome.rounds, 2);
        assert_eq!(outcome.tool_calls, 2);
        assert_eq!(outcome.text, "round with 3 messages");
        assert_eq!(events.last(), Some(&TurnEvent::RoundLimit { rounds: 2 }));

        // user, (assistant, tool) x 2
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[2].role, Role::Tool);
        match &history[2].content {
            MessageContent::Parts(parts) => {
                let text = serde_json::to_string(&parts[0]).unwrap();
                assert!(text.contains(SESSION_UNAVAILABLE), "{text}");
            }
            MessageContent::Text(_) => panic!("expected tool result parts"),
        }
    }

    #[tokio::test]
    async fn engine_failure_surfaces_after_user_message() {
        let dispatcher = unstarted_dispatcher();
        let mut history = vec![Message::system("be brief")];
        let err = run_turn(
            &FailingEngine,
            &dispatcher,
            &mut history,
            "hello",
            &TurnOptions::default(),
            &mut |_| {},
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TurnError::Engine(_)));
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(history.len(), 2);
    }
}
