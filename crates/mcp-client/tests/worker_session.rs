//! Integration tests: drive real worker processes (small `sh` scripts that
//! speak the line protocol) through the full session lifecycle.

#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tw_mcp_client::{McpError, MonitorState, Session, SessionState, WorkerConfig};

// ── Fake workers ────────────────────────────────────────────────────────

/// A sequential worker answering `initialize`, `ping` and `search`, plus
/// whatever extra `case` arms the test supplies.
fn script(extra_cases: &str) -> String {
    format!(
        r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{{"jsonrpc":"2.0","id":\([0-9]*\),.*/\1/p')
  method=$(printf '%s\n' "$line" | sed -n 's/.*"method":"\([^"]*\)".*/\1/p')
  case "$method" in
    initialize) printf '{{"jsonrpc":"2.0","id":%s,"result":{{"serverInfo":{{"name":"fake"}}}}}}\n' "$id" ;;
    ping) printf '{{"jsonrpc":"2.0","id":%s,"result":{{}}}}\n' "$id" ;;
    search) printf '{{"jsonrpc":"2.0","id":%s,"result":{{"hits":[]}}}}\n' "$id" ;;
{extra_cases}
    *) printf '{{"jsonrpc":"2.0","id":%s,"error":"Method not found: %s"}}\n' "$id" "$method" ;;
  esac
done
"#
    )
}

fn config(script: String) -> WorkerConfig {
    WorkerConfig {
        command: "sh".into(),
        args: vec!["-c".into(), script],
        startup_grace_ms: 100,
        init_timeout_ms: 5_000,
        call_timeout_ms: 5_000,
        ping_timeout_ms: 5_000,
        shutdown_grace_ms: 1_000,
        ..WorkerConfig::default()
    }
}

async fn ready_session(cfg: WorkerConfig) -> Arc<Session> {
    let session = Arc::new(Session::new(cfg));
    session.start().await.expect("session should start");
    assert_eq!(session.state(), SessionState::Ready);
    session
}

async fn wait_for_state(session: &Session, want: SessionState) {
    let mut rx = session.subscribe_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}

// ── Lifecycle ───────────────────────────────────────────────────────────

#[tokio::test]
async fn pings_succeed_and_monitor_keeps_running() {
    let session = ready_session(config(script(""))).await;

    for _ in 0..3 {
        session.ping().await.expect("ping");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(session.monitor_state(), Some(MonitorState::Running));
    assert_eq!(session.pending_requests(), 0);

    session.shutdown().await;
}

#[tokio::test]
async fn search_returns_result_payload() {
    let session = ready_session(config(script(""))).await;
    let result = session.call_tool("search", json!({"query": "test"})).await.unwrap();
    assert_eq!(result, json!({"hits": []}));
    session.shutdown().await;
}

#[tokio::test]
async fn error_response_is_tool_error_and_session_survives() {
    let session = ready_session(config(script(""))).await;

    let err = session.call_tool("scrape", json!({})).await.unwrap_err();
    match err {
        McpError::ToolError { tool, message, .. } => {
            assert_eq!(tool, "scrape");
            assert_eq!(message, "Method not found: scrape");
        }
        other => panic!("expected ToolError, got {other:?}"),
    }
    session.ping().await.expect("session still usable");
    session.shutdown().await;
}

#[tokio::test]
async fn ready_banner_is_awaited() {
    let mut cfg = config(format!("echo 'booting' >&2; sleep 0.2; echo READY >&2; {}", script("")));
    cfg.ready_banner = Some("READY".into());
    let session = ready_session(cfg).await;
    assert!(session.stderr_tail().contains("READY"));
    session.shutdown().await;
}

#[tokio::test]
async fn immediate_exit_fails_with_stderr() {
    let session = Session::new(config("echo boom >&2; exit 3".into()));
    let err = session.start().await.unwrap_err();
    assert!(matches!(err, McpError::SpawnFailed(_)), "{err:?}");
    assert!(err.to_string().contains("boom"), "{err}");
    assert_eq!(session.state(), SessionState::Failed);

    // Failed is absorbing.
    assert!(session.start().await.is_err());
    session.shutdown().await;
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test]
async fn missing_executable_fails_to_spawn() {
    let mut cfg = config(String::new());
    cfg.command = "/nonexistent/tw-worker".into();
    let session = Session::new(cfg);
    assert!(matches!(session.start().await, Err(McpError::SpawnFailed(_))));
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test]
async fn rejected_initialize_fails_session() {
    let worker = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9]*\),.*/\1/p')
  printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32602,"message":"unsupported protocol version"}}\n' "$id"
done
"#;
    let session = Session::new(config(worker.into()));
    let err = session.start().await.unwrap_err();
    assert!(matches!(err, McpError::InitializationFailed(_)));
    assert!(err.to_string().contains("unsupported protocol version"));
    assert_eq!(session.state(), SessionState::Failed);
    assert!(session.worker_pid().is_none());
}

#[tokio::test]
async fn silent_worker_times_out_initialize() {
    let mut cfg = config("while IFS= read -r line; do :; done".into());
    cfg.init_timeout_ms = 300;
    let session = Session::new(cfg);
    let err = session.start().await.unwrap_err();
    assert!(matches!(err, McpError::InitializationFailed(_)));
    assert!(err.to_string().contains("timed out"), "{err}");
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test]
async fn shutdown_twice_is_a_no_op() {
    let session = ready_session(config(script(""))).await;
    session.shutdown().await;
    assert_eq!(session.state(), SessionState::Terminated);
    session.shutdown().await;
    assert_eq!(session.state(), SessionState::Terminated);

    let err = session.ping().await.unwrap_err();
    assert!(matches!(err, McpError::SessionUnavailable(SessionState::Terminated)));
}

// ── Channel behaviour ───────────────────────────────────────────────────

#[tokio::test]
async fn malformed_line_is_skipped() {
    let extra = r#"    noisy) echo 'Starting search...'; echo '{"broken":'; printf '{"jsonrpc":"2.0","id":%s,"result":"ok"}\n' "$id" ;;"#;
    let session = ready_session(config(script(extra))).await;

    let result = session.call_tool("noisy", json!({})).await.unwrap();
    assert_eq!(result, json!("ok"));
    session.ping().await.expect("channel still correlates");
    session.shutdown().await;
}

#[tokio::test]
async fn unsolicited_response_is_discarded() {
    let extra = r#"    stray) printf '{"jsonrpc":"2.0","id":999,"result":{"stray":true}}\n'; printf '{"jsonrpc":"2.0","id":%s,"result":{"real":true}}\n' "$id" ;;"#;
    let session = ready_session(config(script(extra))).await;

    let result = session.call_tool("stray", json!({})).await.unwrap();
    assert_eq!(result, json!({"real": true}));
    assert_eq!(session.pending_requests(), 0);
    assert_eq!(session.state(), SessionState::Ready);
    session.shutdown().await;
}

#[tokio::test]
async fn nested_error_result_is_tool_error() {
    let extra = r#"    flaky) printf '{"jsonrpc":"2.0","id":%s,"result":{"error":"Search failed: connection refused"}}\n' "$id" ;;"#;
    let session = ready_session(config(script(extra))).await;

    let err = session.call_tool("flaky", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::ToolError { ref message, .. } if message == "Search failed: connection refused"));
    session.shutdown().await;
}

#[tokio::test]
async fn ping_waits_behind_slow_tool_call() {
    let extra = r#"    slow) sleep 1; printf '{"jsonrpc":"2.0","id":%s,"result":"done"}\n' "$id" ;;"#;
    let session = ready_session(config(script(extra))).await;

    let slow = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            let result = session.call_tool("slow", json!({})).await;
            (result, Instant::now())
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.ping().await.expect("ping");
    let ping_done = Instant::now();

    let (result, slow_done) = slow.await.unwrap();
    assert_eq!(result.unwrap(), json!("done"));
    assert!(slow_done <= ping_done);
    session.shutdown().await;
}

#[tokio::test]
async fn call_timeout_leaves_session_usable() {
    let extra = r#"    hang) : ;;"#;
    let mut cfg = config(script(extra));
    cfg.call_timeout_ms = 300;
    let session = ready_session(cfg).await;

    let err = session.call_tool("hang", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::TransportTimeout { timeout_ms: 300, .. }));
    assert_eq!(session.pending_requests(), 0);
    session.ping().await.expect("session survives a timeout");
    session.shutdown().await;
}

#[tokio::test]
async fn worker_exit_fails_every_pending_request() {
    let extra = r#"    hang) : ;;
    die) exit 0 ;;"#;
    let session = ready_session(config(script(extra))).await;

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.call_tool("hang", json!({})).await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.pending_requests(), 3);

    let started = Instant::now();
    let err = session.call_tool("die", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::TransportClosed { .. }), "{err:?}");
    for waiter in waiters {
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, McpError::TransportClosed { .. }), "{err:?}");
    }
    assert!(started.elapsed() < Duration::from_secs(5));

    wait_for_state(&session, SessionState::Terminated).await;
    session.shutdown().await;
    assert_eq!(session.state(), SessionState::Terminated);
}

#[tokio::test]
async fn externally_killed_worker_terminates_session() {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let session = ready_session(config(script(""))).await;
    let pid = session.worker_pid().expect("worker pid");
    kill(Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();

    let err = session.ping().await.unwrap_err();
    assert!(matches!(err, McpError::TransportClosed { .. }), "{err:?}");

    wait_for_state(&session, SessionState::Terminated).await;
    let err = session.call_tool("search", json!({"query": "x"})).await.unwrap_err();
    assert!(matches!(err, McpError::TransportClosed { .. }), "{err:?}");

    session.shutdown().await;
}

#[tokio::test]
async fn monitor_pings_and_stops_when_worker_dies() {
    let extra = r#"    die) exit 0 ;;"#;
    let mut cfg = config(script(extra));
    cfg.ping_interval_ms = 100;
    let session = ready_session(cfg).await;

    tokio::time::sleep(Duration::from_millis(450)).await;
    assert_eq!(session.monitor_state(), Some(MonitorState::Running));

    let _ = session.call_tool("die", json!({})).await;
    wait_for_state(&session, SessionState::Terminated).await;

    let deadline = Instant::now() + Duration::from_secs(5);
    while session.monitor_state() != Some(MonitorState::Stopped) {
        assert!(Instant::now() < deadline, "monitor did not stop");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    session.shutdown().await;
}

/// Answers the handshake, then never answers another `ping`.
const PING_DEAF_WORKER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9]*\),.*/\1/p')
  method=$(printf '%s\n' "$line" | sed -n 's/.*"method":"\([^"]*\)".*/\1/p')
  case "$method" in
    initialize) printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
    ping) ;;
    search) printf '{"jsonrpc":"2.0","id":%s,"result":{"hits":[]}}\n' "$id" ;;
  esac
done
"#;

#[tokio::test]
async fn ping_timeouts_do_not_stop_the_monitor() {
    let mut cfg = config(PING_DEAF_WORKER.to_string());
    cfg.verify_ping = false;
    cfg.ping_interval_ms = 100;
    cfg.ping_timeout_ms = 50;
    let session = ready_session(cfg).await;

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(session.monitor_state(), Some(MonitorState::Running));
    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.ping_failures() >= 2, "failures = {}", session.ping_failures());
    assert!(session.last_ping_ok().is_none());
    assert_eq!(session.pending_requests(), 0);

    // Timed-out pings leave the channel usable.
    let result = session.call_tool("search", json!({"query": "test"})).await.unwrap();
    assert_eq!(result, json!({"hits": []}));
    session.shutdown().await;
}

#[tokio::test]
async fn answered_pings_are_recorded() {
    let mut cfg = config(script(""));
    cfg.ping_interval_ms = 100;
    let session = ready_session(cfg).await;

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(session.last_ping_ok().is_some());
    assert_eq!(session.ping_failures(), 0);
    session.shutdown().await;
    assert!(session.last_ping_ok().is_none());
}

/// Exits right after answering the verification ping.
const EXIT_AFTER_HANDSHAKE_WORKER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9]*\),.*/\1/p')
  method=$(printf '%s\n' "$line" | sed -n 's/.*"method":"\([^"]*\)".*/\1/p')
  case "$method" in
    initialize) printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
    ping) printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id"; exit 0 ;;
  esac
done
"#;

#[tokio::test]
async fn close_right_after_handshake_terminates_idle_session() {
    let session = Session::new(config(EXIT_AFTER_HANDSHAKE_WORKER.to_string()));
    session.start().await.unwrap();

    // No request is made: the session must notice on its own.
    wait_for_state(&session, SessionState::Terminated).await;
    let err = session.ping().await.unwrap_err();
    assert!(matches!(err, McpError::TransportClosed { .. }), "{err}");
    session.shutdown().await;
    assert_eq!(session.state(), SessionState::Terminated);
}
