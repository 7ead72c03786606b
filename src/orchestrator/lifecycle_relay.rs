//! Lifecycle relay: keeps the bridge in step with the supervisor.
//!
//! | Supervisor event | Bridge action                                  |
//! |------------------|------------------------------------------------|
//! | `Started`        | `reconnect()` if the worker is actually running |
//! | `BeforeKill`     | `shutdown()`                                   |
//! | `Stopped(_)`     | `shutdown()`                                   |
//! | `Starting`       | nothing                                        |

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::Bridge;
use crate::supervisor::{Supervisor, SupervisorEvent};

/// Spawn a task translating supervisor events into bridge commands.
///
/// Subscribe `events` before the first `restart()` so no event is missed.
/// The task runs until `cancel` fires.
#[must_use]
pub fn spawn_lifecycle_relay(
    mut events: broadcast::Receiver<SupervisorEvent>,
    supervisor: Supervisor,
    bridge: Bridge,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => {
                    info!("lifecycle relay shutting down");
                    break;
                }
                received = events.recv() => match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "lifecycle relay lagged behind supervisor events");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            match event {
                SupervisorEvent::Started => {
                    if supervisor.status().running {
                        bridge.reconnect().await;
                    } else {
                        debug!("start did not produce a running worker, bridge stays down");
                    }
                }
                SupervisorEvent::BeforeKill | SupervisorEvent::Stopped(_) => {
                    bridge.shutdown().await;
                }
                SupervisorEvent::Starting => {}
            }
        }
    })
}
