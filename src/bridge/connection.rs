//! Reconnecting WebSocket bridge to the worker.
//!
//! The bridge owns a single outbound connection. [`Bridge::reconnect`]
//! always tears the old connection down first, then dials again. When the
//! connection drops without a [`Bridge::shutdown`], the bridge emits
//! [`BridgeEvent::Close`] and dials again after the retry delay, unless a
//! shutdown lands inside that window.
//!
//! Inbound text frames are parsed into [`Request`](super::envelope::Request)
//! envelopes and published as [`BridgeEvent::Request`]. Each request carries
//! a [`Responder`] bound to the connection it arrived on, so answers go back
//! over the same socket with the request's echo token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::envelope::{encode_answer, log_preview, parse_frame};
use crate::config::BridgeConfig;
use crate::{AppError, Result};

/// Capacity of the bridge event channel.
const EVENT_CAPACITY: usize = 256;

/// Endpoint and reconnect policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    /// `ws://host:port/path` of the worker.
    pub url: String,
    /// Delay before reconnecting after an unexpected close.
    pub retry_delay: Duration,
}

impl From<&BridgeConfig> for BridgeSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            url: config.url(),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

/// Notifications published by the bridge.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// The connection is established.
    Open,
    /// The connection is gone, either shut down or lost.
    Close,
    /// A well-formed request arrived (`request/<type>`).
    Request(InboundRequest),
}

/// A request from the worker, answerable on the connection it came from.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// Request type.
    pub kind: String,
    /// Request payload.
    pub data: Value,
    responder: Responder,
}

impl InboundRequest {
    /// Routing name of this request, `request/<type>`.
    #[must_use]
    pub fn event_name(&self) -> String {
        format!("request/{}", self.kind)
    }

    /// Correlation token carried by the request.
    #[must_use]
    pub fn echo(&self) -> Option<&Value> {
        self.responder.echo.as_ref()
    }

    /// Write `{data: payload, echo}` back to the worker.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if `payload` cannot be serialised or
    /// [`AppError::Bridge`] if the originating connection is gone.
    pub fn answer<T: Serialize>(&self, payload: &T) -> Result<()> {
        self.responder.answer(payload)
    }
}

/// Writes answers for one request onto one connection.
#[derive(Debug, Clone)]
pub struct Responder {
    echo: Option<Value>,
    outbound: mpsc::UnboundedSender<String>,
}

impl Responder {
    fn answer<T: Serialize>(&self, payload: &T) -> Result<()> {
        let text = encode_answer(payload, self.echo.as_ref())?;
        self.outbound
            .send(text)
            .map_err(|_| AppError::Bridge("connection closed before answer".into()))
    }
}

#[derive(Debug)]
struct Connection {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct ConnectionState {
    conn: Option<Connection>,
    stopped: bool,
    generation: u64,
    retry: Option<CancellationToken>,
}

struct Inner {
    settings: BridgeSettings,
    state: Mutex<ConnectionState>,
    connected: AtomicBool,
    events: broadcast::Sender<BridgeEvent>,
}

impl Inner {
    fn emit(&self, event: BridgeEvent) {
        if self.events.send(event).is_err() {
            debug!("bridge event dropped, no subscribers");
        }
    }
}

/// Sole owner of the worker connection. Cheap to clone.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

impl Bridge {
    /// Create a stopped bridge; nothing is dialled until [`reconnect`](Self::reconnect).
    #[must_use]
    pub fn new(settings: BridgeSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                settings,
                state: Mutex::new(ConnectionState {
                    conn: None,
                    stopped: true,
                    generation: 0,
                    retry: None,
                }),
                connected: AtomicBool::new(false),
                events,
            }),
        }
    }

    /// Subscribe to bridge events from this point on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.inner.events.subscribe()
    }

    /// Whether a connection is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Whether the bridge has been shut down (no reconnects will happen).
    pub async fn is_stopped(&self) -> bool {
        self.inner.state.lock().await.stopped
    }

    /// Worker URL in use.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.settings.url
    }

    /// Drop any existing connection and dial a fresh one.
    pub async fn reconnect(&self) {
        let mut state = self.inner.state.lock().await;
        self.reconnect_locked(&mut state);
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Always emits [`BridgeEvent::Close`], even with no connection, so
    /// listeners can rely on the connection being absent afterwards.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        self.shutdown_locked(&mut state);
    }

    fn shutdown_locked(&self, state: &mut ConnectionState) {
        state.stopped = true;
        if let Some(retry) = state.retry.take() {
            retry.cancel();
        }
        if let Some(conn) = state.conn.take() {
            conn.cancel.cancel();
            info!("connection manually shut down");
        }
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.emit(BridgeEvent::Close);
    }

    fn reconnect_locked(&self, state: &mut ConnectionState) {
        self.shutdown_locked(state);
        state.stopped = false;
        state.generation += 1;

        let generation = state.generation;
        let cancel = CancellationToken::new();
        state.conn = Some(Connection {
            generation,
            cancel: cancel.clone(),
        });

        let url = self.inner.settings.url.clone();
        tokio::spawn(
            run_connection(Arc::downgrade(&self.inner), generation, url.clone(), cancel)
                .instrument(info_span!("bridge_connection", generation, %url)),
        );
    }

    async fn reconnect_if_pending(&self, retry: &CancellationToken) {
        let mut state = self.inner.state.lock().await;
        if retry.is_cancelled() || state.stopped {
            debug!("scheduled reconnect suppressed");
            return;
        }
        state.retry = None;
        self.reconnect_locked(&mut state);
    }

    async fn on_open(&self, generation: u64) -> bool {
        let state = self.inner.state.lock().await;
        if !is_current(&state, generation) {
            return false;
        }
        self.inner.connected.store(true, Ordering::SeqCst);
        info!("connected to worker");
        self.inner.emit(BridgeEvent::Open);
        true
    }

    async fn on_unexpected_close(&self, generation: u64, reason: &str) {
        let mut state = self.inner.state.lock().await;
        if !is_current(&state, generation) {
            debug!(reason, "close of a superseded connection, ignoring");
            return;
        }
        state.conn = None;
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.emit(BridgeEvent::Close);

        if state.stopped {
            return;
        }

        let delay = self.inner.settings.retry_delay;
        info!(
            reason,
            retry_ms = delay.as_millis(),
            "connection closed, reconnecting after delay"
        );
        let retry = CancellationToken::new();
        state.retry = Some(retry.clone());

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(
            async move {
                tokio::select! {
                    () = retry.cancelled() => return,
                    () = tokio::time::sleep(delay) => {}
                }
                if let Some(inner) = weak.upgrade() {
                    Bridge { inner }.reconnect_if_pending(&retry).await;
                }
            }
            .instrument(info_span!("delayed_reconnect")),
        );
    }
}

fn is_current(state: &ConnectionState, generation: u64) -> bool {
    state
        .conn
        .as_ref()
        .is_some_and(|conn| conn.generation == generation)
}

/// Drive one connection from dial to close.
async fn run_connection(
    inner: Weak<Inner>,
    generation: u64,
    url: String,
    cancel: CancellationToken,
) {
    let upgrade = || inner.upgrade().map(|inner| Bridge { inner });

    let connected = tokio::select! {
        () = cancel.cancelled() => return,
        result = connect_async(url.as_str()) => result,
    };

    let ws = match connected {
        Ok((ws, _response)) => ws,
        Err(err) => {
            warn!(%err, "connect failed");
            if let Some(bridge) = upgrade() {
                bridge
                    .on_unexpected_close(generation, &format!("connect failed: {err}"))
                    .await;
            }
            return;
        }
    };

    let Some(bridge) = upgrade() else { return };
    if !bridge.on_open(generation).await {
        return;
    }

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let (mut sink, mut stream) = ws.split();

    let reason = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                if let Err(err) = sink.send(Message::Close(None)).await {
                    debug!(%err, "close frame not sent");
                }
                return;
            }

            Some(text) = outbound_rx.recv() => {
                if let Err(err) = sink.send(Message::text(text)).await {
                    break format!("send failed: {err}");
                }
            }

            frame = stream.next() => match frame {
                None => break "stream ended".to_owned(),
                Some(Err(err)) => break format!("read failed: {err}"),
                Some(Ok(Message::Text(text))) => {
                    dispatch_frame(&bridge.inner, text.as_str(), &outbound_tx);
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!("dropping binary frame, expected JSON text");
                }
                Some(Ok(Message::Close(frame))) => {
                    break format!("closed by worker: {frame:?}");
                }
                Some(Ok(_)) => {}
            },
        }
    };

    bridge.on_unexpected_close(generation, &reason).await;
}

/// Parse one text frame and publish it; invalid frames are logged and dropped.
fn dispatch_frame(inner: &Inner, text: &str, outbound: &mpsc::UnboundedSender<String>) {
    match parse_frame(text) {
        Ok(request) => {
            debug!(kind = %request.kind, "request received");
            inner.emit(BridgeEvent::Request(InboundRequest {
                kind: request.kind,
                data: request.data,
                responder: Responder {
                    echo: request.echo,
                    outbound: outbound.clone(),
                },
            }));
        }
        Err(err) => {
            warn!(%err, len = text.len(), raw = log_preview(text), "dropping invalid frame");
        }
    }
}
