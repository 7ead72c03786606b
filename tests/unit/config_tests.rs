use std::path::PathBuf;
use std::time::Duration;

use serial_test::serial;
use worker_bridge::config::IPC_TOKEN_ENV;
use worker_bridge::{config::GlobalConfig, AppError};

fn minimal_toml() -> &'static str {
    r#"
[worker]
binary = "/opt/worker/worker.exe"
"#
}

fn full_toml() -> &'static str {
    r#"
ipc_name = "bridge-test"
snapshot_path = "/var/lib/worker/snapshot.json"

[worker]
binary = "/opt/worker/worker.exe"
process_name = "worker-main"
stage = false
stage_dir = "/tmp/stage"

[supervisor]
too_soon_ms = 5000
retry_delay_ms = 1000
poll_interval_ms = 500
command_timeout_ms = 2000

[bridge]
host = "localhost"
port = 12000
path = "/ws"
retry_delay_ms = 750
"#
}

fn expect_config_error(raw: &str, needle: &str) {
    match GlobalConfig::from_toml_str(raw) {
        Err(AppError::Config(msg)) => assert!(
            msg.contains(needle),
            "expected error mentioning {needle:?}, got {msg:?}"
        ),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn minimal_config_fills_defaults() {
    let config = GlobalConfig::from_toml_str(minimal_toml()).expect("valid config");

    assert_eq!(config.worker.process_name(), "worker");
    assert!(config.worker.stage);
    assert_eq!(config.supervisor.too_soon_ms, 10_000);
    assert_eq!(config.supervisor.retry_delay_ms, 3_000);
    assert_eq!(config.supervisor.poll_interval_ms, 2_000);
    assert_eq!(config.supervisor.command_timeout(), Duration::from_secs(15));
    assert_eq!(config.bridge.port, 9863);
    assert_eq!(config.bridge.retry_delay_ms, 3_000);
    assert_eq!(config.bridge.url(), "ws://127.0.0.1:9863/backend-connect");
    assert_eq!(config.ipc_name, "worker-bridge");
    assert!(config.snapshot_path.is_none());
    assert!(config.ipc_auth_token.is_none());
}

#[test]
fn full_config_overrides_every_default() {
    let config = GlobalConfig::from_toml_str(full_toml()).expect("valid config");

    assert_eq!(config.worker.process_name(), "worker-main");
    assert!(!config.worker.stage);
    assert_eq!(config.worker.stage_dir, PathBuf::from("/tmp/stage"));
    assert_eq!(config.supervisor.too_soon_ms, 5000);
    assert_eq!(config.supervisor.command_timeout(), Duration::from_secs(2));
    assert_eq!(config.bridge.url(), "ws://localhost:12000/ws");
    assert_eq!(config.ipc_name, "bridge-test");
    assert_eq!(
        config.snapshot_path,
        Some(PathBuf::from("/var/lib/worker/snapshot.json"))
    );
}

#[test]
fn missing_worker_section_is_rejected() {
    let result = GlobalConfig::from_toml_str("ipc_name = \"x\"\n");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn empty_binary_is_rejected() {
    expect_config_error("[worker]\nbinary = \"\"\n", "worker.binary");
}

#[test]
fn zero_port_is_rejected() {
    expect_config_error(
        "[worker]\nbinary = \"/w/worker\"\n[bridge]\nport = 0\n",
        "bridge.port",
    );
}

#[test]
fn relative_path_is_rejected() {
    expect_config_error(
        "[worker]\nbinary = \"/w/worker\"\n[bridge]\npath = \"ws\"\n",
        "bridge.path",
    );
}

#[test]
fn zero_durations_are_rejected() {
    expect_config_error(
        "[worker]\nbinary = \"/w/worker\"\n[supervisor]\nretry_delay_ms = 0\n",
        "supervisor.retry_delay_ms must be greater than zero",
    );
    expect_config_error(
        "[worker]\nbinary = \"/w/worker\"\n[bridge]\nretry_delay_ms = 0\n",
        "bridge.retry_delay_ms",
    );
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, minimal_toml()).expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("loads");
    assert_eq!(config.worker.binary, PathBuf::from("/opt/worker/worker.exe"));
}

#[test]
fn load_from_missing_path_is_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = GlobalConfig::load_from_path(dir.path().join("absent.toml"));
    match result {
        Err(AppError::Config(msg)) => assert!(msg.contains("failed to read config")),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
#[serial]
fn ipc_token_is_read_from_env() {
    std::env::set_var(IPC_TOKEN_ENV, "secret-token");
    let mut config = GlobalConfig::from_toml_str(minimal_toml()).expect("valid config");
    config.load_ipc_token();
    std::env::remove_var(IPC_TOKEN_ENV);

    assert_eq!(config.ipc_auth_token.as_deref(), Some("secret-token"));
}

#[test]
#[serial]
fn empty_ipc_token_disables_auth() {
    std::env::set_var(IPC_TOKEN_ENV, "");
    let mut config = GlobalConfig::from_toml_str(minimal_toml()).expect("valid config");
    config.load_ipc_token();
    std::env::remove_var(IPC_TOKEN_ENV);

    assert!(config.ipc_auth_token.is_none());
}
