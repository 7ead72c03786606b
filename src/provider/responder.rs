//! `query` responder: answers `request/query` with the provider snapshot.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{PlayerSnapshot, Provider};
use crate::bridge::BridgeEvent;

/// Request type answered by this responder.
pub const QUERY_KIND: &str = "query";

/// Spawn a task answering every `query` request from `events`.
///
/// Other request types and connection events are ignored. The task runs
/// until `cancel` fires or the event channel closes.
#[must_use]
pub fn spawn_query_responder(
    mut events: broadcast::Receiver<BridgeEvent>,
    provider: Arc<dyn Provider>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => {
                    info!("query responder shutting down");
                    break;
                }
                received = events.recv() => match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "query responder lagged, requests dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => {
                        info!("bridge event channel closed");
                        break;
                    }
                },
            };

            let BridgeEvent::Request(request) = event else {
                continue;
            };
            if request.kind != QUERY_KIND {
                continue;
            }

            let source = Arc::clone(&provider);
            let snapshot = match tokio::task::spawn_blocking(move || source.query()).await {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    warn!(%err, "snapshot provider failed, answering with empty snapshot");
                    PlayerSnapshot::empty()
                }
            };
            match request.answer(&snapshot) {
                Ok(()) => debug!(echo = ?request.echo(), "query answered"),
                Err(err) => warn!(%err, "failed to answer query"),
            }
        }
    })
}
