//! Session supervisor: spawn, handshake, monitoring and teardown of one
//! worker process.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use tw_domain::config::WorkerConfig;

use crate::channel::Channel;
use crate::error::McpError;
use crate::liveness::{LivenessMonitor, MonitorState};
use crate::protocol::initialize_params;
use crate::state::{SessionState, StateCell};
use crate::transport::{SpawnedWorker, Transport};

/// Read timeout for the reader task when the liveness monitor is disabled.
const DEFAULT_IDLE_PROBE: Duration = Duration::from_secs(15);

/// How long to let the stderr drain catch up before reporting a failed start.
const STARTUP_STDERR_SETTLE: Duration = Duration::from_millis(500);

struct Worker {
    transport: Arc<Transport>,
    channel: Arc<Channel>,
    monitor: LivenessMonitor,
    watcher: JoinHandle<()>,
}

/// One live worker process and everything needed to talk to it.
///
/// The request-id counter and pending table live inside this session's
/// channel; nothing is shared between sessions.
pub struct Session {
    config: WorkerConfig,
    state: StateCell,
    worker: parking_lot::Mutex<Option<Arc<Worker>>>,
    teardown: tokio::sync::Mutex<()>,
}

impl Session {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            state: StateCell::new(),
            worker: parking_lot::Mutex::new(None),
            teardown: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn worker_pid(&self) -> Option<u32> {
        self.worker.lock().as_ref().and_then(|w| w.transport.pid())
    }

    /// `None` before start and after teardown.
    pub fn monitor_state(&self) -> Option<MonitorState> {
        self.worker.lock().as_ref().map(|w| w.monitor.state())
    }

    /// When the liveness monitor last got a ping answer.
    pub fn last_ping_ok(&self) -> Option<Instant> {
        self.worker.lock().as_ref().and_then(|w| w.monitor.last_ok())
    }

    /// Monitor pings that failed in a row without closing the channel.
    pub fn ping_failures(&self) -> u32 {
        self.worker
            .lock()
            .as_ref()
            .map_or(0, |w| w.monitor.consecutive_failures())
    }

    pub fn pending_requests(&self) -> usize {
        self.worker
            .lock()
            .as_ref()
            .map_or(0, |w| w.channel.router().pending_count())
    }

    pub fn stderr_tail(&self) -> String {
        self.worker
            .lock()
            .as_ref()
            .map(|w| w.transport.stderr_tail())
            .unwrap_or_default()
    }

    // ── Startup ─────────────────────────────────────────────────────

    /// Spawn the worker, run the handshake and start the liveness monitor.
    ///
    /// On failure the session ends in [`SessionState::Failed`] with the
    /// worker process already reaped.
    pub async fn start(&self) -> Result<(), McpError> {
        self.state
            .transition(SessionState::Spawning)
            .map_err(|_| McpError::SessionUnavailable(self.state.get()))?;

        let SpawnedWorker {
            transport,
            reader,
            banner,
        } = match Transport::spawn(&self.config) {
            Ok(spawned) => spawned,
            Err(e) => {
                tracing::error!(command = %self.config.command, error = %e, "worker spawn failed");
                self.mark_failed();
                return Err(e);
            }
        };
        let transport = Arc::new(transport);

        tokio::time::sleep(self.config.startup_grace()).await;
        if let Some(status) = transport.probe_exit().await {
            return Err(self
                .abort_startup(&transport, format!("worker exited during startup ({status})"))
                .await);
        }

        if let Some(banner) = banner {
            let expected = self.config.ready_banner.as_deref().unwrap_or_default();
            match tokio::time::timeout(self.config.ready_timeout(), banner).await {
                Ok(Ok(())) => tracing::debug!(banner = expected, "worker ready banner seen"),
                Ok(Err(_)) => {
                    return Err(self
                        .abort_startup(&transport, format!("worker closed stderr before printing '{expected}'"))
                        .await)
                }
                Err(_) => {
                    return Err(self
                        .abort_startup(
                            &transport,
                            format!(
                                "no '{expected}' banner within {}ms",
                                self.config.ready_timeout_ms
                            ),
                        )
                        .await)
                }
            }
        }

        let idle_probe = self.config.ping_interval().unwrap_or(DEFAULT_IDLE_PROBE);
        let channel = Arc::new(Channel::start(Arc::clone(&transport), reader, idle_probe));

        self.state.transition(SessionState::Initializing)?;
        if let Err(reason) = self.handshake(&channel).await {
            let err = McpError::InitializationFailed(reason);
            channel.router().fail_all(err.clone());
            let termination = transport.terminate(self.config.shutdown_grace()).await;
            channel.stop_reader().await;
            let _ = self.state.transition(SessionState::Failed);
            tracing::error!(
                error = %err,
                ?termination,
                stderr = %transport.stderr_tail().trim_end(),
                "worker initialization failed"
            );
            return Err(err);
        }

        let monitor = LivenessMonitor::new();
        let watcher = tokio::spawn(watch_channel(
            channel.router().closed_token(),
            self.state.clone(),
        ));
        *self.worker.lock() = Some(Arc::new(Worker {
            transport: Arc::clone(&transport),
            channel: Arc::clone(&channel),
            monitor,
            watcher,
        }));

        self.state.transition(SessionState::Ready)?;
        // The watcher only acts on a ready session; catch a close that
        // landed while we were still initializing.
        if channel.router().is_closed()
            && self
                .state
                .transition_from(SessionState::Ready, SessionState::Terminated)
        {
            tracing::warn!("worker channel closed during startup; session terminated");
            return Ok(());
        }

        if let Some(interval) = self.config.ping_interval() {
            if let Some(worker) = self.worker.lock().as_ref() {
                worker
                    .monitor
                    .start(Arc::clone(&channel), interval, self.config.ping_timeout());
            }
        }

        tracing::info!(pid = ?transport.pid(), command = %self.config.command, "worker session ready");
        Ok(())
    }

    async fn handshake(&self, channel: &Channel) -> Result<(), String> {
        let params = serde_json::to_value(initialize_params(
            &self.config.protocol_version,
            &self.config.client_name,
        ))
        .map_err(|e| format!("failed to encode initialize params: {e}"))?;

        let response = channel
            .request("initialize", params, self.config.init_timeout())
            .await
            .map_err(|e| describe(&e))?;
        let result = response
            .into_result()
            .map_err(|e| format!("initialize rejected: {}", e.message))?;
        tracing::debug!(result = %result, "initialize acknowledged");

        if self.config.verify_ping {
            channel
                .ping(self.config.ping_timeout())
                .await
                .map_err(|e| format!("verification ping failed: {}", describe(&e)))?;
        }
        Ok(())
    }

    async fn abort_startup(&self, transport: &Transport, reason: String) -> McpError {
        transport.settle_stderr(STARTUP_STDERR_SETTLE).await;
        let termination = transport.terminate(Duration::ZERO).await;
        let stderr = transport.stderr_tail();
        let message = if stderr.is_empty() {
            reason
        } else {
            format!("{reason}; stderr: {}", stderr.trim_end())
        };
        tracing::error!(error = %message, ?termination, "worker failed to start");
        self.mark_failed();
        McpError::SpawnFailed(message)
    }

    fn mark_failed(&self) {
        if let Err(e) = self.state.transition(SessionState::Failed) {
            tracing::debug!(error = %e, "could not mark session failed");
        }
    }

    // ── Requests ────────────────────────────────────────────────────

    fn live_worker(&self) -> Result<Arc<Worker>, McpError> {
        let state = self.state.get();
        let worker = self.worker.lock().clone();
        match (state, worker) {
            (SessionState::Ready, Some(worker)) => Ok(worker),
            // The worker died under us: report why rather than just the state.
            (SessionState::Terminated, Some(worker)) => Err(worker
                .channel
                .router()
                .close_reason()
                .unwrap_or(McpError::SessionUnavailable(state))),
            _ => Err(McpError::SessionUnavailable(state)),
        }
    }

    /// Send `method` and wait up to `timeout`. Error responses become
    /// [`McpError::ToolError`] tagged with the method name.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let worker = self.live_worker()?;
        let envelope = worker
            .channel
            .request(method, params, timeout)
            .await
            .map_err(|e| self.note_failure(e))?;
        envelope.into_result().map_err(|e| McpError::ToolError {
            tool: method.to_string(),
            message: e.message,
            detail: e.detail,
        })
    }

    pub async fn ping(&self) -> Result<(), McpError> {
        let worker = self.live_worker()?;
        worker
            .channel
            .ping(self.config.ping_timeout())
            .await
            .map_err(|e| self.note_failure(e))
    }

    /// Direct-style tool call bounded by the configured call timeout.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        self.request(name, arguments, self.config.call_timeout()).await
    }

    /// A session-fatal error seen by a caller terminates the session right
    /// away instead of waiting for the channel watcher to run.
    fn note_failure(&self, err: McpError) -> McpError {
        if err.is_session_fatal()
            && self
                .state
                .transition_from(SessionState::Ready, SessionState::Terminated)
        {
            tracing::warn!(error = %err, "worker channel closed; session terminated");
        }
        err
    }

    // ── Teardown ────────────────────────────────────────────────────

    /// Two-phase teardown. Safe to call any number of times.
    pub async fn shutdown(&self) {
        let _guard = self.teardown.lock().await;
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        self.state
            .transition_from(SessionState::Ready, SessionState::Terminating);

        worker.monitor.stop().await;
        worker.watcher.abort();

        let failed = worker
            .channel
            .router()
            .fail_all(worker.transport.closed_error("session shutting down"));
        if failed > 0 {
            tracing::warn!(failed, "pending requests failed by shutdown");
        }

        let termination = worker.transport.terminate(self.config.shutdown_grace()).await;
        worker.channel.stop_reader().await;

        let tail = worker.transport.stderr_tail();
        if !tail.is_empty() {
            tracing::info!(stderr = %tail.trim_end(), "worker stderr tail");
        }
        tracing::info!(?termination, "worker stopped");

        self.state
            .transition_from(SessionState::Terminating, SessionState::Terminated);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Without a shutdown the background tasks would keep the transport
        // (and through kill_on_drop, the process) alive.
        if let Some(worker) = self.worker.get_mut().take() {
            worker.monitor.abort();
            worker.watcher.abort();
            worker.channel.abort_reader();
        }
    }
}

/// Moves a ready session to `terminated` once its channel closes.
async fn watch_channel(closed: tokio_util::sync::CancellationToken, state: StateCell) {
    closed.cancelled().await;
    if state.transition_from(SessionState::Ready, SessionState::Terminated) {
        tracing::warn!("worker channel closed; session terminated");
    }
}

fn describe(err: &McpError) -> String {
    match err.stderr() {
        Some(stderr) => format!("{err}; stderr: {}", stderr.trim_end()),
        None => err.to_string(),
    }
}
