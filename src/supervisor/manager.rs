//! Worker process supervisor.
//!
//! Owns "the worker process": starts and kills it, watches it, classifies
//! every stop, and restarts it after a late exit. All transitions run under
//! one async mutex, so a `restart` or `kill` is a single in-flight operation
//! and overlapping calls queue behind it rather than interleave.
//!
//! # Stop classification
//!
//! | Exit                               | Reason              | Follow-up              |
//! |------------------------------------|---------------------|------------------------|
//! | requested via [`Supervisor::kill`] | `Manual`            | none                   |
//! | self-exit before `too_soon`        | `UnexpectedTooSoon` | none (crash loop)      |
//! | self-exit after `too_soon`         | `UnexpectedLate`    | restart after `retry`  |
//! | launch error                       | `StartFailed`       | none                   |

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::state::{Phase, StopReason, SupervisorEvent, SupervisorStatus, WorkerHandle};
use super::watcher::ProcessWatcher;
use crate::config::SupervisorConfig;
use crate::process::ProcessHost;

/// Capacity of the lifecycle event channel.
const EVENT_CAPACITY: usize = 64;

/// Timing policy for the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Self-exits sooner than this after a start are crash loops.
    pub too_soon: Duration,
    /// Delay before restarting after a late self-exit.
    pub retry_delay: Duration,
    /// Liveness poll interval of the watcher.
    pub poll_interval: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from(&SupervisorConfig::default())
    }
}

impl From<&SupervisorConfig> for SupervisorSettings {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            too_soon: Duration::from_millis(config.too_soon_ms),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

/// Mutable state, only touched with the mutex held.
#[derive(Debug)]
struct State {
    stopped: bool,
    starting: bool,
    stop_reason: StopReason,
    last_start_time: Option<Instant>,
    last_started_at: Option<DateTime<Utc>>,
    handle: Option<WorkerHandle>,
    watcher: Option<ProcessWatcher>,
    /// Bumped on every successful start; stale watcher signals are ignored.
    generation: u64,
    /// Pending delayed restart, cancelled by any kill.
    retry: Option<CancellationToken>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            stopped: true,
            starting: false,
            stop_reason: StopReason::Manual,
            last_start_time: None,
            last_started_at: None,
            handle: None,
            watcher: None,
            generation: 0,
            retry: None,
        }
    }
}

impl State {
    fn running(&self) -> bool {
        self.handle.is_some() && !self.stopped
    }

    fn snapshot(&self) -> SupervisorStatus {
        let phase = if self.starting {
            Phase::Starting
        } else if self.running() {
            Phase::Running
        } else if self.stopped {
            Phase::Stopped
        } else {
            Phase::Retrying
        };
        SupervisorStatus {
            phase,
            running: self.running(),
            stopped: self.stopped,
            stop_reason: self.stop_reason,
            pid: self.handle.map(|h| h.pid),
            last_started_at: self.last_started_at,
            needs_attention: self.stopped && self.stop_reason.needs_attention(),
        }
    }
}

struct Inner {
    host: Arc<dyn ProcessHost>,
    settings: SupervisorSettings,
    state: Mutex<State>,
    status_tx: watch::Sender<SupervisorStatus>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl Inner {
    fn publish(&self, state: &State) {
        self.status_tx.send_replace(state.snapshot());
    }

    fn emit(&self, event: SupervisorEvent) {
        debug!(?event, "supervisor event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Sole owner of the worker process lifecycle.
///
/// Cheap to clone; clones share the same state. Construct one per
/// application and hand clones to whoever needs it.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Create a stopped supervisor driving `host`.
    #[must_use]
    pub fn new(host: Arc<dyn ProcessHost>, settings: SupervisorSettings) -> Self {
        let (status_tx, _) = watch::channel(SupervisorStatus::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                host,
                settings,
                state: Mutex::new(State::default()),
                status_tx,
                events,
            }),
        }
    }

    /// Subscribe to lifecycle events from this point on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.inner.events.subscribe()
    }

    /// Watch the status snapshot.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<SupervisorStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Current status snapshot. Never blocks on an in-flight restart.
    #[must_use]
    pub fn status(&self) -> SupervisorStatus {
        self.inner.status_tx.borrow().clone()
    }

    /// Timing policy in effect.
    #[must_use]
    pub fn settings(&self) -> SupervisorSettings {
        self.inner.settings
    }

    /// Kill any existing worker and start a fresh one.
    ///
    /// Emits `Starting`, then (from the internal kill) `BeforeKill` and
    /// `Stopped(Manual)` if a worker was live, and always finishes with
    /// `Started`. A launch failure is recorded as
    /// [`StopReason::StartFailed`] and announced with `Stopped` just before
    /// `Started`; it is never returned to the caller.
    pub async fn restart(&self) {
        let mut state = self.inner.state.lock().await;
        self.restart_locked(&mut state).await;
    }

    /// Stop the worker with `reason`.
    ///
    /// Idempotent: the reason is always recorded and any watcher or pending
    /// restart is torn down, but `BeforeKill` and `Stopped` are only emitted
    /// when this call actually interrupts a non-stopped state. The OS-level
    /// kill by name is always attempted, covering workers orphaned by an
    /// earlier supervisor.
    pub async fn kill(&self, reason: StopReason) {
        let mut state = self.inner.state.lock().await;
        self.kill_locked(&mut state, reason).await;
    }

    /// `kill(StopReason::Manual)`, for application shutdown.
    pub async fn shutdown(&self) {
        self.kill(StopReason::Manual).await;
    }

    async fn restart_locked(&self, state: &mut State) {
        let inner = &self.inner;
        state.starting = true;
        inner.publish(state);
        inner.emit(SupervisorEvent::Starting);

        self.kill_locked(state, StopReason::Manual).await;
        state.stopped = false;

        match inner.host.start_worker().await {
            Ok(pid) => {
                let now = Instant::now();
                state.last_start_time = Some(now);
                state.last_started_at = Some(Utc::now());
                state.generation += 1;
                state.handle = Some(WorkerHandle {
                    pid,
                    started_at: now,
                });

                let watcher = ProcessWatcher::spawn(
                    pid,
                    Arc::clone(&inner.host),
                    inner.settings.poll_interval,
                );
                self.attach_stop_callback(&watcher, state.generation);
                state.watcher = Some(watcher);
                info!(pid, "worker started");
            }
            Err(err) => {
                state.stopped = true;
                state.stop_reason = StopReason::StartFailed;
                error!(%err, "worker start failed");
                state.starting = false;
                inner.publish(state);
                inner.emit(SupervisorEvent::Stopped(StopReason::StartFailed));
            }
        }

        state.starting = false;
        inner.publish(state);
        inner.emit(SupervisorEvent::Started);
    }

    async fn kill_locked(&self, state: &mut State, reason: StopReason) {
        let inner = &self.inner;
        let was_stopped = state.stopped;
        state.stopped = true;
        state.stop_reason = reason;

        if let Some(retry) = state.retry.take() {
            retry.cancel();
            debug!("pending restart cancelled");
        }

        if !was_stopped {
            inner.publish(state);
            inner.emit(SupervisorEvent::BeforeKill);
        }

        if let Some(watcher) = state.watcher.take() {
            watcher.close();
            info!(pid = watcher.pid(), "process watcher closed");
        }

        let pid = state.handle.take().map(|h| h.pid);
        match inner.host.kill_worker(pid).await {
            Ok(()) => info!(?pid, "worker killed"),
            Err(err) => warn!(%err, ?pid, "worker kill failed"),
        }

        inner.publish(state);
        if !was_stopped {
            inner.emit(SupervisorEvent::Stopped(reason));
        }
    }

    fn attach_stop_callback(&self, watcher: &ProcessWatcher, generation: u64) {
        let stopped = watcher.stopped();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(
            async move {
                stopped.await;
                if let Some(inner) = weak.upgrade() {
                    Supervisor { inner }.on_worker_exit(generation).await;
                }
            }
            .instrument(info_span!("worker_exit", generation)),
        );
    }

    /// Classify a watcher `stopped` signal.
    async fn on_worker_exit(&self, generation: u64) {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;

        if state.generation != generation || state.stopped {
            debug!("watcher signal for a handled stop, ignoring");
            return;
        }

        let elapsed = state
            .last_start_time
            .map_or(Duration::ZERO, |started| started.elapsed());
        state.handle = None;
        state.watcher = None;

        if elapsed < inner.settings.too_soon {
            state.stopped = true;
            state.stop_reason = StopReason::UnexpectedTooSoon;
            info!(
                elapsed_ms = elapsed.as_millis(),
                "worker stopped too soon, will not restart"
            );
            inner.publish(&state);
            inner.emit(SupervisorEvent::Stopped(StopReason::UnexpectedTooSoon));
            return;
        }

        state.stop_reason = StopReason::UnexpectedLate;
        let retry = CancellationToken::new();
        state.retry = Some(retry.clone());
        info!(
            elapsed_ms = elapsed.as_millis(),
            retry_ms = inner.settings.retry_delay.as_millis(),
            "worker stopped unexpectedly, will restart after delay"
        );
        inner.publish(&state);
        inner.emit(SupervisorEvent::Stopped(StopReason::UnexpectedLate));
        drop(state);

        self.schedule_restart(retry);
    }

    fn schedule_restart(&self, retry: CancellationToken) {
        let delay = self.inner.settings.retry_delay;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(
            async move {
                tokio::select! {
                    () = retry.cancelled() => return,
                    () = tokio::time::sleep(delay) => {}
                }
                if let Some(inner) = weak.upgrade() {
                    Supervisor { inner }.restart_if_pending(&retry).await;
                }
            }
            .instrument(info_span!("delayed_restart")),
        );
    }

    /// Fire a scheduled restart unless a kill got in first.
    async fn restart_if_pending(&self, retry: &CancellationToken) {
        let mut state = self.inner.state.lock().await;
        if retry.is_cancelled() || state.stopped {
            debug!("scheduled restart suppressed");
            return;
        }
        state.retry = None;
        self.restart_locked(&mut state).await;
    }
}
