//! Global configuration parsing and validation.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Environment variable holding the optional IPC shared secret.
pub const IPC_TOKEN_ENV: &str = "WORKER_BRIDGE_IPC_TOKEN";

/// Worker binary location and launch options.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Path to the worker executable.
    pub binary: PathBuf,
    /// Process name used for query-by-name and kill-by-name.
    ///
    /// Derived from the file stem of [`binary`](Self::binary) when omitted.
    #[serde(default)]
    pub process_name: Option<String>,
    /// Copy the binary into [`stage_dir`](Self::stage_dir) before launching,
    /// so the original file is never locked by the running process.
    #[serde(default = "default_true")]
    pub stage: bool,
    /// Directory the binary is staged into.
    #[serde(default = "default_stage_dir")]
    pub stage_dir: PathBuf,
}

impl WorkerConfig {
    /// Effective process name for the worker.
    #[must_use]
    pub fn process_name(&self) -> String {
        self.process_name.clone().unwrap_or_else(|| {
            self.binary
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
    }
}

/// Supervisor timing knobs, in milliseconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SupervisorConfig {
    /// Minimum uptime below which a self-exit counts as a crash loop.
    #[serde(default = "default_too_soon_ms")]
    pub too_soon_ms: u64,
    /// Delay before an automatic restart.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Interval between liveness polls of the worker.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound for a single OS command round trip.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            too_soon_ms: default_too_soon_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl SupervisorConfig {
    /// Command Runner timeout as a [`Duration`].
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Message bridge endpoint and reconnect policy.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Host the worker listens on.
    #[serde(default = "default_host")]
    pub host: String,
    /// Fixed worker port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// WebSocket path on the worker.
    #[serde(default = "default_path")]
    pub path: String,
    /// Delay before reconnecting after an unexpected close.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl BridgeConfig {
    /// WebSocket URL of the worker endpoint.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}:{}{}", self.host, self.port, self.path)
    }
}

fn default_true() -> bool {
    true
}

fn default_stage_dir() -> PathBuf {
    env::temp_dir().join("worker-bridge")
}

fn default_too_soon_ms() -> u64 {
    10_000
}

fn default_retry_delay_ms() -> u64 {
    3_000
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_command_timeout_ms() -> u64 {
    15_000
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    9863
}

fn default_path() -> String {
    "/backend-connect".into()
}

fn default_ipc_name() -> String {
    "worker-bridge".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Worker binary settings.
    pub worker: WorkerConfig,
    /// Supervisor timings.
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Bridge endpoint.
    #[serde(default)]
    pub bridge: BridgeConfig,
    /// Named pipe / Unix socket identifier for the ctl companion.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Optional JSON file served as the `query` answer.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    /// Shared secret for IPC requests (populated at runtime).
    #[serde(skip)]
    pub ipc_auth_token: Option<String>,
}

impl GlobalConfig {
    /// Load configuration from a TOML file on disk.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read the IPC shared secret from [`IPC_TOKEN_ENV`].
    ///
    /// An unset or empty variable disables IPC authentication.
    pub fn load_ipc_token(&mut self) {
        self.ipc_auth_token = env::var(IPC_TOKEN_ENV).ok().filter(|v| !v.is_empty());
    }

    fn validate(&self) -> Result<()> {
        if self.worker.binary.as_os_str().is_empty() {
            return Err(AppError::Config("worker.binary must not be empty".into()));
        }

        if self.worker.process_name().is_empty() {
            return Err(AppError::Config(
                "worker.process_name could not be derived from worker.binary".into(),
            ));
        }

        if self.bridge.port == 0 {
            return Err(AppError::Config("bridge.port must be non-zero".into()));
        }

        if !self.bridge.path.starts_with('/') {
            return Err(AppError::Config("bridge.path must start with '/'".into()));
        }

        let durations = [
            ("supervisor.too_soon_ms", self.supervisor.too_soon_ms),
            ("supervisor.retry_delay_ms", self.supervisor.retry_delay_ms),
            ("supervisor.poll_interval_ms", self.supervisor.poll_interval_ms),
            (
                "supervisor.command_timeout_ms",
                self.supervisor.command_timeout_ms,
            ),
            ("bridge.retry_delay_ms", self.bridge.retry_delay_ms),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, ms)| *ms == 0) {
            return Err(AppError::Config(format!("{name} must be greater than zero")));
        }

        Ok(())
    }
}
