//! Reference stdio worker for toolwire.
//!
//! Reads one JSON request per line on stdin and writes one JSON response
//! per line on stdout. Diagnostics go to stderr, which also carries the
//! `READY` banner once the worker accepts requests.
//!
//! Methods:
//!
//! - `initialize`, `ping`: protocol plumbing
//! - `search`: forwards to a SearXNG-style JSON search endpoint
//! - `get_current_time`: local wall clock
//! - `tools/list`, `tools/call`: MCP-style wrappers over the tools above
//!
//! Env vars:
//!   SEARXNG_ENDPOINT  search endpoint (default: http://localhost:8000)
//!   RUST_LOG          log filter (default: info)

mod handlers;
mod searxng;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use crate::handlers::Worker;
use crate::searxng::SearchClient;

pub const READY_BANNER: &str = "READY";
const DEFAULT_ENDPOINT: &str = "http://localhost:8000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout is the protocol channel: logs must stay on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .compact()
        .init();

    let endpoint = std::env::var("SEARXNG_ENDPOINT")
        .ok()
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| DEFAULT_ENDPOINT.into());
    let worker = Worker::new(SearchClient::new(&endpoint)?);

    tracing::info!(endpoint = %endpoint, pid = std::process::id(), "search worker starting");
    eprintln!("{READY_BANNER}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(response) = worker.handle_line(&line).await {
            stdout.write_all(response.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }

    tracing::info!("stdin closed, worker exiting");
    Ok(())
}
