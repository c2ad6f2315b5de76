//! Periodic `ping` over the shared channel.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Running,
    /// Terminal; a stopped monitor is never restarted.
    Stopped,
}

struct Shared {
    state: Mutex<MonitorState>,
    last_ok: Mutex<Option<Instant>>,
    failures: AtomicU32,
}

pub struct LivenessMonitor {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for LivenessMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessMonitor {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MonitorState::Idle),
                last_ok: Mutex::new(None),
                failures: AtomicU32::new(0),
            }),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> MonitorState {
        *self.shared.state.lock()
    }

    /// When the last ping succeeded.
    pub fn last_ok(&self) -> Option<Instant> {
        *self.shared.last_ok.lock()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.shared.failures.load(Ordering::Relaxed)
    }

    /// Begin pinging every `interval`. Only an idle monitor can start.
    pub fn start(&self, channel: Arc<Channel>, interval: Duration, ping_timeout: Duration) {
        {
            let mut state = self.shared.state.lock();
            if *state != MonitorState::Idle {
                tracing::warn!(state = ?*state, "liveness monitor cannot be started again");
                return;
            }
            *state = MonitorState::Running;
        }
        tracing::debug!(interval_ms = interval.as_millis() as u64, "liveness monitor started");
        let task = tokio::spawn(run(
            channel,
            Arc::clone(&self.shared),
            self.cancel.clone(),
            interval,
            ping_timeout,
        ));
        *self.task.lock() = Some(task);
    }

    /// Cancel without waiting. Used when the owner is dropped.
    pub fn abort(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    /// Cancel the monitor and wait for its task to finish.
    pub async fn stop(&self) {
        self.cancel.cancel();
        *self.shared.state.lock() = MonitorState::Stopped;
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn run(
    channel: Arc<Channel>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    interval: Duration,
    ping_timeout: Duration,
) {
    let closed = channel.router().closed_token();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = closed.cancelled() => {
                tracing::debug!("channel closed, liveness monitor stopping");
                break;
            }
            _ = ticker.tick() => {}
        }

        let transport = channel.transport();
        if let Some(status) = transport.probe_exit().await {
            let err = transport.closed_error(format!("worker exited ({status})"));
            tracing::warn!(error = %err, "liveness probe found worker gone");
            channel.router().fail_all(err);
            break;
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = channel.ping(ping_timeout) => outcome,
        };

        match outcome {
            Ok(()) => {
                *shared.last_ok.lock() = Some(Instant::now());
                shared.failures.store(0, Ordering::Relaxed);
                tracing::trace!("liveness ping ok");
            }
            Err(e) if e.is_session_fatal() => {
                tracing::warn!(error = %e, "liveness ping hit a closed channel");
                break;
            }
            Err(e) => {
                let failures = shared.failures.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(failures, error = %e, "liveness ping failed");
            }
        }
    }

    *shared.state.lock() = MonitorState::Stopped;
}
