#![forbid(unsafe_code)]

//! `worker-bridge-ctl`: local CLI companion for `worker-bridge`.
//!
//! Connects to the IPC socket and sends JSON commands to the daemon.

use std::io::{BufRead, BufReader, Write};

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};

/// Environment variable holding the IPC shared secret.
///
/// Kept in sync with `worker_bridge::config::IPC_TOKEN_ENV`; the ctl binary
/// does not depend on the library crate.
const IPC_TOKEN_ENV: &str = "WORKER_BRIDGE_IPC_TOKEN";

#[derive(Debug, Parser)]
#[command(
    name = "worker-bridge-ctl",
    about = "Local CLI for the worker-bridge daemon",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the daemon's `ipc_name` config).
    #[arg(long, default_value = "worker-bridge")]
    ipc_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show supervisor and bridge state.
    Status,
    /// Kill the worker and start a fresh one.
    Restart,
    /// Stop the worker without restarting it.
    Kill,
    /// Drop and reopen the bridge connection.
    Reconnect,
}

impl Command {
    fn verb(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Restart => "restart",
            Self::Kill => "kill",
            Self::Reconnect => "reconnect",
        }
    }
}

fn main() {
    let args = Cli::parse();

    let mut request_json = serde_json::json!({ "command": args.command.verb() });
    if let Some(token) = std::env::var(IPC_TOKEN_ENV).ok().filter(|t| !t.is_empty()) {
        request_json["auth_token"] = serde_json::Value::String(token);
    }

    match send_ipc_command(&args.ipc_name, &request_json) {
        Ok(response) => {
            if let Some(obj) = response.as_object() {
                let ok = obj
                    .get("ok")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if ok {
                    if let Some(data) = obj.get("data") {
                        println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
                    } else {
                        println!("OK");
                    }
                } else {
                    let err_msg = obj
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown error");
                    eprintln!("Error: {err_msg}");
                    std::process::exit(1);
                }
            } else {
                println!("{response}");
            }
        }
        Err(err) => {
            eprintln!("Failed to connect to daemon: {err}");
            eprintln!("Is worker-bridge running with ipc_name '{}'?", args.ipc_name);
            std::process::exit(1);
        }
    }
}

/// Connect to the IPC socket, send a JSON command, and read the response.
fn send_ipc_command(
    ipc_name: &str,
    request: &serde_json::Value,
) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    let response: serde_json::Value = serde_json::from_str(response_line.trim())?;
    Ok(response)
}
