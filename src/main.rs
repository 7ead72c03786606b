#![forbid(unsafe_code)]

//! `worker-bridge`: supervises the worker process and keeps a WebSocket
//! bridge to it open while it runs.
//!
//! Bootstraps configuration, starts the supervisor, the bridge, the query
//! responder, and the IPC server for `worker-bridge-ctl`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use worker_bridge::bridge::{Bridge, BridgeSettings};
use worker_bridge::command::ShellRunner;
use worker_bridge::config::GlobalConfig;
use worker_bridge::ipc::server::{spawn_ipc_server, ControlState};
use worker_bridge::orchestrator::spawn_lifecycle_relay;
use worker_bridge::process::SystemHost;
use worker_bridge::provider::{spawn_query_responder, FileProvider, Provider, SharedSnapshot};
use worker_bridge::supervisor::{Supervisor, SupervisorSettings};
use worker_bridge::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "worker-bridge", about = "Worker process supervisor and bridge", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("worker-bridge bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    config.load_ipc_token();
    info!(binary = %config.worker.binary.display(), "configuration loaded");

    // ── Build supervisor and bridge ─────────────────────
    let runner = Arc::new(ShellRunner::new(config.supervisor.command_timeout()));
    let host = Arc::new(SystemHost::new(runner, config.worker.clone()));
    let supervisor = Supervisor::new(host, SupervisorSettings::from(&config.supervisor));
    let bridge = Bridge::new(BridgeSettings::from(&config.bridge));

    let provider: Arc<dyn Provider> = match config.snapshot_path {
        Some(ref path) => {
            info!(path = %path.display(), "serving snapshots from file");
            Arc::new(FileProvider::new(path.clone()))
        }
        None => Arc::new(SharedSnapshot::default()),
    };

    // ── Start background tasks ──────────────────────────
    let ct = CancellationToken::new();
    let responder_handle = spawn_query_responder(bridge.subscribe(), provider, ct.clone());
    let relay_handle = spawn_lifecycle_relay(
        supervisor.subscribe(),
        supervisor.clone(),
        bridge.clone(),
        ct.clone(),
    );

    let control = ControlState {
        supervisor: supervisor.clone(),
        bridge: bridge.clone(),
        port: config.bridge.port,
        auth_token: config.ipc_auth_token.clone(),
    };
    let ipc_handle = spawn_ipc_server(config.ipc_name.clone(), control, ct.clone())?;

    // ── Launch the worker ───────────────────────────────
    supervisor.restart().await;
    let status = supervisor.status();
    if let Some(hint) = status.hint(config.bridge.port) {
        error!(reason = ?status.stop_reason, "{hint}");
    }
    info!("worker-bridge ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    bridge.shutdown().await;
    supervisor.shutdown().await;

    // ── Wait for background tasks ───────────────────────
    let _ = tokio::join!(responder_handle, relay_handle, ipc_handle);
    info!("worker-bridge shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
