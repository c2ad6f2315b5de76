//! `toolwire chat`: interactive REPL command.
//!
//! Spawns the worker session, then reads one line per turn and runs it
//! through the engine/tool loop. `exit`, `quit` or `q` end the session.

use std::sync::Arc;

use anyhow::Context;
use rustyline::error::ReadlineError;

use tw_domain::config::Config;
use tw_domain::tool::Message;
use tw_mcp_client::{Session, ToolDispatcher, ToolRegistry};
use tw_providers::OpenAiCompatEngine;

use crate::runtime::{ensure_session_alive, run_turn, TurnError, TurnEvent, TurnOptions};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run the interactive chat REPL.
///
/// Returns `Ok(true)` after a clean teardown and `Ok(false)` when the
/// worker session died underneath the conversation. Spawn and handshake
/// failures are returned as errors.
pub async fn chat(config: Config) -> anyhow::Result<bool> {
    let registry = Arc::new(ToolRegistry::new(config.tools.clone()).context("tool registry")?);
    let engine = OpenAiCompatEngine::from_config(&config.llm).context("completion engine")?;

    let session = Arc::new(Session::new(config.worker.clone()));
    if let Err(e) = session.start().await {
        if let Some(stderr) = e.stderr() {
            eprintln!("{}", stderr.trim_end());
        }
        return Err(e).with_context(|| format!("starting worker '{}'", config.worker.command));
    }
    let dispatcher = ToolDispatcher::new(session.clone(), registry);

    let mut rl = rustyline::DefaultEditor::new()?;
    let opts = TurnOptions {
        max_tool_rounds: config.llm.max_tool_rounds,
        model: None,
    };
    let mut history = base_history(&config);

    eprintln!(
        "toolwire chat ({} tool(s), worker pid {})",
        dispatcher.registry().len(),
        session.worker_pid().map_or_else(|| "?".into(), |p| p.to_string()),
    );
    eprintln!("Type exit, quit or q to leave.");
    eprintln!();

    let mut clean = true;
    loop {
        if let Err(e) = ensure_session_alive(&dispatcher) {
            report_session_lost(&e);
            clean = false;
            break;
        }

        let line = match rl.readline("you> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                eprintln!("(Use Ctrl+D or exit to quit)");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("readline error: {e}");
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        rl.add_history_entry(trimmed).ok();
        if is_exit_command(trimmed) {
            break;
        }

        let mark = history.len();
        let result = run_turn(
            &engine,
            &dispatcher,
            &mut history,
            trimmed,
            &opts,
            &mut print_event,
        )
        .await;

        match result {
            Ok(outcome) => {
                println!("{}", outcome.text);
                println!();
            }
            Err(e @ TurnError::SessionLost { .. }) => {
                report_session_lost(&e);
                clean = false;
                break;
            }
            Err(e) => {
                eprintln!("error: {e}");
                // Drop the unanswered turn so the next one starts clean.
                history.truncate(mark);
            }
        }
    }

    session.shutdown().await;
    eprintln!("Goodbye!");
    Ok(clean)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn is_exit_command(input: &str) -> bool {
    matches!(input.to_ascii_lowercase().as_str(), "exit" | "quit" | "q")
}

fn base_history(config: &Config) -> Vec<Message> {
    config
        .llm
        .system_prompt
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .map(|p| vec![Message::system(p)])
        .unwrap_or_default()
}

fn report_session_lost(err: &TurnError) {
    eprintln!("error: {err}");
    if let TurnError::SessionLost { stderr, .. } = err {
        if !stderr.is_empty() {
            eprintln!("{}", stderr.trim_end());
        }
    }
}

fn print_event(event: TurnEvent) {
    match event {
        TurnEvent::ToolCall {
            tool_name,
            arguments,
            ..
        } => eprintln!("[tool: {tool_name} {arguments}]"),
        TurnEvent::ToolResult {
            tool_name,
            content,
            is_error: true,
            ..
        } => eprintln!("[tool error: {tool_name}: {content}]"),
        TurnEvent::ToolResult { .. } => {}
        TurnEvent::RoundLimit { rounds } => {
            eprintln!("(stopped after {rounds} tool rounds)");
        }
    }
}
