//! Integration tests: tool call batches dispatched against a real worker.

#![cfg(unix)]

use std::sync::Arc;

use serde_json::{json, Value};
use tw_domain::config::default_tools;
use tw_domain::tool::{CallStyle, ParamKind, ToolCall, ToolDescriptor, ToolParam};
use tw_mcp_client::{Session, SessionState, ToolDispatcher, ToolRegistry, WorkerConfig};

const WORKER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9]*\),.*/\1/p')
  method=$(printf '%s\n' "$line" | sed -n 's/.*"method":"\([^"]*\)".*/\1/p')
  case "$method" in
    initialize) printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
    ping) printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
    search) printf '{"jsonrpc":"2.0","id":%s,"result":{"hits":[]}}\n' "$id" ;;
    tools/call)
      case "$line" in
        *'"name":"get_forecast"'*) printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"{\\"forecast\\":\\"sunny\\"}"}],"isError":false}}\n' "$id" ;;
        *) printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"Unknown tool"}],"isError":true}}\n' "$id" ;;
      esac ;;
    crash) exit 1 ;;
    *) printf '{"jsonrpc":"2.0","id":%s,"error":"Method not found: %s"}\n' "$id" "$method" ;;
  esac
done
"#;

fn descriptor(name: &str, call_style: CallStyle) -> ToolDescriptor {
    ToolDescriptor {
        name: name.into(),
        description: String::new(),
        call_style,
        params: vec![ToolParam {
            name: "location".into(),
            kind: ParamKind::String,
            description: String::new(),
        }],
        required: vec![],
    }
}

async fn dispatcher() -> ToolDispatcher {
    let config = WorkerConfig {
        command: "sh".into(),
        args: vec!["-c".into(), WORKER.into()],
        startup_grace_ms: 100,
        call_timeout_ms: 5_000,
        shutdown_grace_ms: 1_000,
        ..WorkerConfig::default()
    };
    let session = Arc::new(Session::new(config));
    session.start().await.unwrap();

    let mut tools = default_tools();
    tools.push(descriptor("get_forecast", CallStyle::ToolsCall));
    tools.push(descriptor("get_alerts", CallStyle::ToolsCall));
    tools.push(descriptor("crash", CallStyle::Direct));
    tools.push(descriptor("scrape", CallStyle::Direct));
    ToolDispatcher::new(session, Arc::new(ToolRegistry::new(tools).unwrap()))
}

fn call(id: &str, tool: &str, arguments: Value) -> ToolCall {
    ToolCall {
        call_id: id.into(),
        tool_name: tool.into(),
        arguments,
    }
}

#[tokio::test]
async fn search_record_carries_result() {
    let dispatcher = dispatcher().await;
    let records = dispatcher
        .dispatch(&[call("call_1", "search", json!({"query": "test"}))])
        .await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].call_id, "call_1");
    assert!(!records[0].is_error());
    assert_eq!(records[0].content(), json!({"hits": []}));
    dispatcher.session().shutdown().await;
}

#[tokio::test]
async fn failures_are_isolated_per_intent() {
    let dispatcher = dispatcher().await;
    let records = dispatcher
        .dispatch(&[
            call("a", "nonexistent", json!({})),
            call("b", "search", json!({})),
            call("c", "search", json!("test")),
            call("d", "scrape", json!({})),
            call("e", "search", json!({"query": "rust"})),
        ])
        .await;

    let ids: Vec<_> = records.iter().map(|r| r.call_id.as_str()).collect();
    assert_eq!(ids, ["a", "b", "c", "d", "e"]);

    let errors: Vec<String> = records[..4]
        .iter()
        .map(|r| r.outcome.clone().unwrap_err())
        .collect();
    assert!(errors[0].contains("unknown tool 'nonexistent'"));
    assert!(errors[1].contains("missing required parameter(s): query"));
    assert!(errors[2].contains("arguments must be an object"));
    assert!(errors[3].contains("Method not found: scrape"));

    assert_eq!(records[4].outcome, Ok(json!({"hits": []})));
    dispatcher.session().shutdown().await;
}

#[tokio::test]
async fn tools_call_style_unwraps_mcp_content() {
    let dispatcher = dispatcher().await;
    let records = dispatcher
        .dispatch(&[
            call("f", "get_forecast", json!({"location": "Paris"})),
            call("g", "get_alerts", json!({"location": "CA"})),
        ])
        .await;

    assert_eq!(records[0].outcome, Ok(json!({"forecast": "sunny"})));
    let err = records[1].outcome.clone().unwrap_err();
    assert!(err.contains("get_alerts"), "{err}");
    assert!(err.contains("Unknown tool"), "{err}");
    dispatcher.session().shutdown().await;
}

#[tokio::test]
async fn session_death_mid_batch_fails_the_rest() {
    let dispatcher = dispatcher().await;
    let records = dispatcher
        .dispatch(&[
            call("1", "search", json!({"query": "before"})),
            call("2", "crash", json!({})),
            call("3", "search", json!({"query": "after"})),
        ])
        .await;

    assert!(!records[0].is_error());
    assert!(records[1].outcome.clone().unwrap_err().contains("transport closed"));
    assert_eq!(records[2].content(), json!({"error": "Session unavailable"}));

    let mut rx = dispatcher.session().subscribe_state();
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        rx.wait_for(|s| *s == SessionState::Terminated),
    )
    .await
    .unwrap()
    .unwrap();

    let records = dispatcher
        .dispatch(&[call("4", "search", json!({"query": "later"}))])
        .await;
    assert_eq!(records[0].content(), json!({"error": "Session unavailable"}));
    dispatcher.session().shutdown().await;
}
