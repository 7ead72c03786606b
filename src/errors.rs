//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// An OS-level command failed to run, timed out, or reported failure.
    Command(String),
    /// Process query or termination failure.
    Process(String),
    /// The worker process could not be launched.
    Spawn(String),
    /// WebSocket connection or send failure.
    Bridge(String),
    /// Malformed frame or envelope on the bridge.
    Protocol(String),
    /// IPC communication failure.
    Ipc(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Command(msg) => write!(f, "command: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Bridge(msg) => write!(f, "bridge: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}
