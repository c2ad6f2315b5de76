//! Stdio transport: one spawned worker process and its three streams.
//!
//! Writes go through a mutex around stdin so each line lands whole. Stdout
//! is handed out once as a [`LineReader`] for the reader task. Stderr is
//! drained in the background into a bounded tail buffer.

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use tw_domain::config::WorkerConfig;

use crate::error::McpError;

/// How long to wait for the stderr drain to catch up after the worker exits.
const STDERR_SETTLE: Duration = Duration::from_millis(250);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stderr tail
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The last `cap` bytes of worker stderr, kept line by line.
#[derive(Clone)]
pub struct StderrTail {
    lines: Arc<parking_lot::Mutex<VecDeque<String>>>,
    bytes: Arc<parking_lot::Mutex<usize>>,
    cap: usize,
}

impl StderrTail {
    pub fn new(cap: usize) -> Self {
        Self {
            lines: Arc::new(parking_lot::Mutex::new(VecDeque::new())),
            bytes: Arc::new(parking_lot::Mutex::new(0)),
            cap,
        }
    }

    pub fn push_line(&self, line: &str) {
        if self.cap == 0 {
            return;
        }
        let mut line = line.to_string();
        if line.len() > self.cap {
            let mut start = line.len() - self.cap;
            while !line.is_char_boundary(start) {
                start += 1;
            }
            line = line.split_off(start);
        }
        let mut lines = self.lines.lock();
        let mut bytes = self.bytes.lock();
        *bytes += line.len() + 1;
        lines.push_back(line);
        while *bytes > self.cap + 1 {
            match lines.pop_front() {
                Some(old) => *bytes -= old.len() + 1,
                None => break,
            }
        }
    }

    /// Newline-joined copy of the retained output.
    pub fn snapshot(&self) -> String {
        let lines = self.lines.lock();
        let mut out = String::with_capacity(*self.bytes.lock());
        for line in lines.iter() {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

async fn drain_stderr(
    stderr: ChildStderr,
    tail: StderrTail,
    mut banner: Option<(String, oneshot::Sender<()>)>,
) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::debug!(target: "worker_stderr", "{line}");
                tail.push_line(&line);
                let seen = banner
                    .as_ref()
                    .is_some_and(|(expected, _)| line.trim() == expected.as_str());
                if seen {
                    if let Some((_, tx)) = banner.take() {
                        let _ = tx.send(());
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "worker stderr read failed");
                break;
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Spawn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A freshly spawned worker, split into its parts.
pub struct SpawnedWorker {
    pub transport: Transport,
    pub reader: LineReader,
    /// Fires when the configured ready banner shows up on stderr. The
    /// sender is dropped without firing if stderr closes first.
    pub banner: Option<oneshot::Receiver<()>>,
}

/// How the worker ended during [`Transport::terminate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited on its own before we signalled it.
    AlreadyExited(ExitStatus),
    /// Exited within the grace period after stdin closed and SIGTERM.
    Exited(ExitStatus),
    /// Did not exit in time and was killed.
    Killed,
}

pub struct Transport {
    pid: Option<u32>,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Child>,
    exit: parking_lot::Mutex<Option<ExitStatus>>,
    stderr: StderrTail,
    stderr_task: Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    /// Spawn the configured worker with all three streams piped.
    pub fn spawn(config: &WorkerConfig) -> Result<SpawnedWorker, McpError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::SpawnFailed(format!("{}: {e}", config.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::SpawnFailed("failed to capture worker stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::SpawnFailed("failed to capture worker stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::SpawnFailed("failed to capture worker stderr".into()))?;

        let pid = child.id();
        let tail = StderrTail::new(config.stderr_tail_bytes);

        let (banner_tx, banner) = match &config.ready_banner {
            Some(expected) => {
                let (tx, rx) = oneshot::channel();
                (Some((expected.clone(), tx)), Some(rx))
            }
            None => (None, None),
        };
        let stderr_task = tokio::spawn(drain_stderr(stderr, tail.clone(), banner_tx));

        tracing::info!(command = %config.command, pid = ?pid, "worker spawned");

        Ok(SpawnedWorker {
            transport: Transport {
                pid,
                stdin: Mutex::new(Some(stdin)),
                child: Mutex::new(child),
                exit: parking_lot::Mutex::new(None),
                stderr: tail.clone(),
                stderr_task: Mutex::new(Some(stderr_task)),
            },
            reader: LineReader {
                lines: BufReader::new(stdout).lines(),
                stderr: tail,
            },
            banner,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn stderr_tail(&self) -> String {
        self.stderr.snapshot()
    }

    /// Non-blocking check whether the worker has exited.
    pub async fn probe_exit(&self) -> Option<ExitStatus> {
        if let Some(status) = *self.exit.lock() {
            return Some(status);
        }
        let mut child = self.child.lock().await;
        match child.try_wait() {
            Ok(Some(status)) => {
                *self.exit.lock() = Some(status);
                Some(status)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to poll worker status");
                None
            }
        }
    }

    /// `TransportClosed` carrying the current stderr tail.
    pub fn closed_error(&self, reason: impl Into<String>) -> McpError {
        McpError::closed(reason, self.stderr.snapshot())
    }

    /// Write one line (newline appended) and flush.
    pub async fn send(&self, line: &str) -> Result<(), McpError> {
        if let Some(status) = self.probe_exit().await {
            return Err(self.closed_error(format!("worker exited ({status})")));
        }

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| self.closed_error("worker stdin already closed"))?;

        let result = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;

        result.map_err(|e| {
            // A failed write leaves a partial line behind; the channel is unusable.
            *guard = None;
            self.closed_error(format!("write to worker failed: {e}"))
        })
    }

    /// Give the stderr drain up to `wait` to reach EOF so the tail is complete.
    pub async fn settle_stderr(&self, wait: Duration) {
        let mut guard = self.stderr_task.lock().await;
        if let Some(handle) = guard.as_mut() {
            if tokio::time::timeout(wait, handle).await.is_ok() {
                *guard = None;
            }
        }
    }

    /// Close stdin, SIGTERM, wait up to `grace`, then kill and reap.
    pub async fn terminate(&self, grace: Duration) -> Termination {
        drop(self.stdin.lock().await.take());

        let termination = {
            let mut child = self.child.lock().await;
            match child.try_wait() {
                Ok(Some(status)) => Termination::AlreadyExited(status),
                _ => {
                    #[cfg(unix)]
                    {
                        use nix::sys::signal::{kill, Signal};
                        use nix::unistd::Pid;
                        if let Some(pid) = self.pid {
                            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                                tracing::debug!(pid, error = %e, "SIGTERM failed");
                            }
                        }
                    }

                    match tokio::time::timeout(grace, child.wait()).await {
                        Ok(Ok(status)) => Termination::Exited(status),
                        Ok(Err(e)) => {
                            tracing::warn!(error = %e, "waiting for worker failed, killing");
                            kill_and_reap(&mut child).await
                        }
                        Err(_) => {
                            tracing::warn!(
                                grace_ms = grace.as_millis() as u64,
                                "worker ignored SIGTERM, killing"
                            );
                            kill_and_reap(&mut child).await
                        }
                    }
                }
            }
        };

        if let Termination::AlreadyExited(status) | Termination::Exited(status) = termination {
            *self.exit.lock() = Some(status);
        }

        self.settle_stderr(STDERR_SETTLE).await;
        if let Some(handle) = self.stderr_task.lock().await.take() {
            // A grandchild may still hold the stderr pipe open.
            handle.abort();
        }
        termination
    }
}

async fn kill_and_reap(child: &mut Child) -> Termination {
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "failed to kill worker");
    }
    Termination::Killed
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reader side
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Exclusive owner of the worker's stdout.
pub struct LineReader {
    lines: Lines<BufReader<ChildStdout>>,
    stderr: StderrTail,
}

impl LineReader {
    /// Wait for the next stdout line.
    pub async fn receive_line(&mut self, timeout: Duration) -> Result<String, McpError> {
        match tokio::time::timeout(timeout, self.lines.next_line()).await {
            Err(_) => Err(McpError::timeout("read", timeout)),
            Ok(Ok(Some(line))) => Ok(line),
            Ok(Ok(None)) => Err(McpError::closed(
                "worker closed stdout",
                self.stderr.snapshot(),
            )),
            Ok(Err(e)) => Err(McpError::closed(
                format!("read from worker failed: {e}"),
                self.stderr.snapshot(),
            )),
        }
    }
}
