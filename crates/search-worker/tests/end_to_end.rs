//! Drives the compiled worker through a real toolwire session.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tw_domain::config::default_tools;
use tw_domain::tool::ToolCall;
use tw_mcp_client::{McpError, Session, SessionState, ToolDispatcher, ToolRegistry, WorkerConfig};

/// Fake SearXNG: answers every GET with `body` and reports the request line.
async fn fake_searxng(body: Value) -> (String, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel(4);

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let tx = tx.clone();
            let body = body.to_string();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 2048];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&buf).to_string();
                let request_line = head.lines().next().unwrap_or_default().to_string();
                let _ = tx.send(request_line).await;

                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (format!("http://{addr}/search"), rx)
}

fn config(endpoint: &str) -> WorkerConfig {
    WorkerConfig {
        command: env!("CARGO_BIN_EXE_tw-search-worker").into(),
        env: HashMap::from([
            ("SEARXNG_ENDPOINT".to_string(), endpoint.to_string()),
            ("RUST_LOG".to_string(), "debug".to_string()),
        ]),
        ready_banner: Some("READY".into()),
        startup_grace_ms: 50,
        call_timeout_ms: 10_000,
        shutdown_grace_ms: 2_000,
        ..WorkerConfig::default()
    }
}

#[tokio::test]
async fn search_goes_through_the_worker() {
    let (endpoint, mut requests) = fake_searxng(json!({
        "results": [
            {"title": "The Rust Programming Language", "url": "https://rust-lang.org"},
            {"title": "Tokio", "url": "https://tokio.rs"},
            {"title": "Serde", "url": "https://serde.rs"}
        ]
    }))
    .await;

    let session = Arc::new(Session::new(config(&endpoint)));
    session.start().await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    session.ping().await.unwrap();

    let dispatcher = ToolDispatcher::new(
        session.clone(),
        Arc::new(ToolRegistry::new(default_tools()).unwrap()),
    );
    let records = dispatcher
        .dispatch(&[ToolCall {
            call_id: "call_1".into(),
            tool_name: "search".into(),
            arguments: json!({"query": "rust async", "max_results": 2}),
        }])
        .await;

    let result = records[0].outcome.as_ref().unwrap();
    assert_eq!(result["query"], "rust async");
    assert_eq!(result["results_count"], 3);
    assert_eq!(result["results"].as_array().unwrap().len(), 2);

    let request_line = requests.recv().await.unwrap();
    assert!(request_line.starts_with("GET /search?"), "{request_line}");
    assert!(request_line.contains("q=rust+async"), "{request_line}");
    assert!(request_line.contains("format=json"), "{request_line}");

    session.shutdown().await;
    assert_eq!(session.state(), SessionState::Terminated);
}

#[tokio::test]
async fn search_failure_is_a_tool_error() {
    let session = Session::new(config("http://127.0.0.1:9"));
    session.start().await.unwrap();

    let err = session
        .call_tool("search", json!({"query": "test"}))
        .await
        .unwrap_err();
    match &err {
        McpError::ToolError { tool, message, .. } => {
            assert_eq!(tool, "search");
            assert!(message.starts_with("Network error"), "{message}");
        }
        other => panic!("expected tool error, got {other:?}"),
    }
    // Tool failures do not hurt the session.
    session.ping().await.unwrap();
    session.shutdown().await;
}

#[tokio::test]
async fn current_time_direct_call() {
    let session = Session::new(config("http://127.0.0.1:9"));
    session.start().await.unwrap();

    let value = session.call_tool("get_current_time", json!({})).await.unwrap();
    assert!(value["iso_format"].is_string());
    assert!(value["timestamp"].as_i64().unwrap() > 0);

    session.shutdown().await;
}
