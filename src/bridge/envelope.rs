//! Wire envelopes exchanged with the worker.
//!
//! Requests arrive as `{"type": <string>, "data": <any>, "echo"?: <any>}`.
//! Answers go back as `{"data": <any>, "echo"?: <any>}` where `echo` is the
//! request's token copied verbatim. A request without `echo` gets an answer
//! without `echo`; an explicit `"echo": null` is echoed as `null`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppError, Result};

/// A request received from the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Request type; routes to the `request/<type>` event.
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload.
    pub data: Value,
    /// Correlation token, absent for fire-and-forget requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo: Option<Value>,
}

/// An answer written back to the worker.
#[derive(Debug, Serialize)]
struct Answer<'a, T: Serialize> {
    data: &'a T,
    #[serde(skip_serializing_if = "Option::is_none")]
    echo: Option<&'a Value>,
}

/// Parse one inbound text frame.
///
/// # Errors
///
/// - [`AppError::Protocol`]`("malformed json: …")` if the frame is not JSON.
/// - [`AppError::Protocol`]`("invalid message: …")` if it is not an object, or
///   `type`/`data` missing, or `type` not a string.
pub fn parse_frame(text: &str) -> Result<Request> {
    let value: Value = serde_json::from_str(text)
        .map_err(|err| AppError::Protocol(format!("malformed json: {err}")))?;

    let Value::Object(mut map) = value else {
        return Err(AppError::Protocol("invalid message: not an object".into()));
    };

    // `data: null` is present; only a missing key is rejected.
    let data = map
        .remove("data")
        .ok_or_else(|| AppError::Protocol("invalid message: missing `data`".into()))?;
    let kind = match map.remove("type") {
        Some(Value::String(kind)) => kind,
        Some(_) => {
            return Err(AppError::Protocol(
                "invalid message: `type` must be a string".into(),
            ))
        }
        None => return Err(AppError::Protocol("invalid message: missing `type`".into())),
    };

    Ok(Request {
        kind,
        data,
        echo: map.remove("echo"),
    })
}

/// Serialise an answer to the request that carried `echo`.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if `payload` cannot be serialised.
pub fn encode_answer<T: Serialize>(payload: &T, echo: Option<&Value>) -> Result<String> {
    Ok(serde_json::to_string(&Answer {
        data: payload,
        echo,
    })?)
}

/// Longest prefix of a frame that goes into a log line.
pub const LOG_PREVIEW_BYTES: usize = 256;

/// Prefix of `text` safe to log: at most [`LOG_PREVIEW_BYTES`], cut on a
/// char boundary.
#[must_use]
pub fn log_preview(text: &str) -> &str {
    if text.len() <= LOG_PREVIEW_BYTES {
        return text;
    }
    let mut end = LOG_PREVIEW_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
