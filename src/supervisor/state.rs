//! Supervisor state model, lifecycle events, and the public status snapshot.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Why the worker is not running.
///
/// Exactly one reason is attached to every transition into the stopped
/// state; it is only replaced by the next kill or restart cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Stop requested by an operator or by the supervisor itself.
    #[default]
    Manual,
    /// The worker exited on its own inside the minimum-uptime window.
    /// Treated as a crash loop; no automatic restart.
    UnexpectedTooSoon,
    /// The worker exited on its own after the minimum-uptime window.
    /// An automatic restart follows after the retry delay.
    UnexpectedLate,
    /// The start attempt itself failed.
    StartFailed,
}

impl StopReason {
    /// Whether this reason needs an operator to step in.
    #[must_use]
    pub fn needs_attention(self) -> bool {
        matches!(self, Self::UnexpectedTooSoon | Self::StartFailed)
    }
}

impl Display for StopReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Manual => "manual",
            Self::UnexpectedTooSoon => "unexpected_too_soon",
            Self::UnexpectedLate => "unexpected_late",
            Self::StartFailed => "start_failed",
        };
        f.write_str(text)
    }
}

/// Identifies one running worker instance. Owned by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerHandle {
    /// OS process id.
    pub pid: u32,
    /// When the start completed.
    pub started_at: Instant,
}

/// Lifecycle notifications, delivered in state-change order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// A restart began.
    Starting,
    /// A restart finished, successfully or not. Always closes a restart.
    Started,
    /// A kill is about to interrupt a non-stopped worker.
    BeforeKill,
    /// The worker is no longer running.
    Stopped(StopReason),
}

/// Coarse lifecycle phase for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Not running and not coming back on its own.
    #[default]
    Stopped,
    /// A restart is in flight.
    Starting,
    /// The worker is up.
    Running,
    /// The worker exited late; an automatic restart is pending.
    Retrying,
}

/// Read-only snapshot of the supervisor, published on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorStatus {
    /// Coarse phase.
    pub phase: Phase,
    /// A worker handle is held and the supervisor is not stopped.
    pub running: bool,
    /// The supervisor will not restart the worker on its own.
    pub stopped: bool,
    /// Reason attached to the most recent stop.
    pub stop_reason: StopReason,
    /// Pid of the running worker.
    pub pid: Option<u32>,
    /// Wall-clock time of the last successful start.
    pub last_started_at: Option<DateTime<Utc>>,
    /// Whether the last stop needs an operator.
    pub needs_attention: bool,
}

impl Default for SupervisorStatus {
    fn default() -> Self {
        Self {
            phase: Phase::Stopped,
            running: false,
            stopped: true,
            stop_reason: StopReason::Manual,
            pid: None,
            last_started_at: None,
            needs_attention: false,
        }
    }
}

impl SupervisorStatus {
    /// Operator-facing explanation of a stop that needs attention.
    #[must_use]
    pub fn hint(&self, port: u16) -> Option<String> {
        if !self.stopped {
            return None;
        }
        match self.stop_reason {
            StopReason::UnexpectedTooSoon => Some(format!(
                "worker stopped too soon; check whether port {port} is already in use"
            )),
            StopReason::StartFailed => {
                Some("worker failed to start; check that the binary exists".to_owned())
            }
            StopReason::Manual | StopReason::UnexpectedLate => None,
        }
    }
}
