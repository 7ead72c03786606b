//! Worker lifecycle supervision.
//!
//! Covers the liveness watcher, the stop-classifying supervisor, and the
//! state/event types they publish.

pub mod manager;
pub mod state;
pub mod watcher;

pub use manager::{Supervisor, SupervisorSettings};
pub use state::{Phase, StopReason, SupervisorEvent, SupervisorStatus, WorkerHandle};
pub use watcher::ProcessWatcher;
