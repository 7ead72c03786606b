//! Reconnecting message bridge to the worker.
//!
//! Covers the wire envelopes and the persistent WebSocket connection with
//! typed event dispatch and echo-token answer correlation.

pub mod connection;
pub mod envelope;

pub use connection::{Bridge, BridgeEvent, BridgeSettings, InboundRequest};
pub use envelope::{encode_answer, log_preview, parse_frame, Request, LOG_PREVIEW_BYTES};
