//! Local IPC server for `worker-bridge-ctl` commands.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate. Accepts line-delimited JSON commands
//! and routes them to the supervisor and bridge.
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"command": "status"}
//! {"command": "restart"}
//! {"command": "kill"}
//! {"command": "reconnect"}
//! ```
//!
//! Response (one JSON object per line):
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "unknown command: foo"}
//! ```

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::bridge::Bridge;
use crate::supervisor::{StopReason, Supervisor};
use crate::{AppError, Result};

/// Everything an IPC command may touch.
#[derive(Clone)]
pub struct ControlState {
    /// Worker supervisor.
    pub supervisor: Supervisor,
    /// Worker connection.
    pub bridge: Bridge,
    /// Worker port, for diagnostics.
    pub port: u16,
    /// Shared secret expected on every request, if set.
    pub auth_token: Option<String>,
}

/// Inbound IPC request from `worker-bridge-ctl`.
#[derive(Debug, Deserialize)]
pub struct IpcRequest {
    /// Command verb.
    pub command: String,
    /// Shared-secret authentication token.
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// Outbound IPC response to `worker-bridge-ctl`.
#[derive(Debug, Serialize, PartialEq)]
pub struct IpcResponse {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Spawn the IPC server task.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    name: String,
    state: ControlState,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "IPC server listening");

    let handle = tokio::spawn(async move {
        let span = info_span!("ipc_server", name = %name);
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                tokio::spawn(handle_connection(stream, state.clone()));
                            }
                            Err(err) => {
                                warn!(%err, "IPC accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

/// Serve one client until it hangs up; one response line per request line.
async fn handle_connection(stream: interprocess::local_socket::tokio::Stream, state: ControlState) {
    let (reader, mut writer) = stream.split();
    let mut lines = BufReader::new(reader).lines();

    async move {
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let reply = respond_to_line(line.trim(), &state).await;
            if let Err(err) = writer.write_all(reply.as_bytes()).await {
                warn!(%err, "failed to write ipc response");
                break;
            }
        }
        info!("IPC connection closed");
    }
    .instrument(info_span!("ipc_conn"))
    .await;
}

/// Answer one request line with a newline-terminated JSON response.
async fn respond_to_line(line: &str, state: &ControlState) -> String {
    let response = match serde_json::from_str::<IpcRequest>(line) {
        Ok(request) => dispatch_command(&request, state).await,
        Err(err) => IpcResponse::error(format!("invalid json: {err}")),
    };
    let mut reply = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"ok":false,"error":"serialization failed"}"#.to_owned());
    reply.push('\n');
    reply
}

/// Route an IPC command to the appropriate handler.
pub async fn dispatch_command(request: &IpcRequest, state: &ControlState) -> IpcResponse {
    if let Some(ref expected) = state.auth_token {
        match request.auth_token {
            Some(ref provided) if provided == expected => {}
            _ => {
                warn!(command = %request.command, "IPC request rejected: invalid auth token");
                return IpcResponse::error("unauthorized");
            }
        }
    }

    let response = match request.command.as_str() {
        "status" => handle_status(state).await,
        "restart" => {
            state.supervisor.restart().await;
            handle_status(state).await
        }
        "kill" => {
            state.supervisor.kill(StopReason::Manual).await;
            handle_status(state).await
        }
        "reconnect" => {
            state.bridge.reconnect().await;
            handle_status(state).await
        }
        other => return IpcResponse::error(format!("unknown command: {other}")),
    };
    info!(command = %request.command, "IPC command handled");
    response
}

/// Report supervisor and bridge state.
async fn handle_status(state: &ControlState) -> IpcResponse {
    let status = state.supervisor.status();
    let hint = status.hint(state.port);
    let supervisor = match serde_json::to_value(&status) {
        Ok(value) => value,
        Err(err) => return IpcResponse::error(format!("failed to encode status: {err}")),
    };

    IpcResponse::success(serde_json::json!({
        "supervisor": supervisor,
        "hint": hint,
        "bridge": {
            "url": state.bridge.url(),
            "connected": state.bridge.is_connected(),
            "stopped": state.bridge.is_stopped().await,
        },
    }))
}
