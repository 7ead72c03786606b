#![forbid(unsafe_code)]

//! Supervises a long-running worker process and relays queries to it over
//! a reconnecting WebSocket.

pub mod bridge;
pub mod command;
pub mod config;
pub mod errors;
pub mod ipc;
pub mod orchestrator;
pub mod process;
pub mod provider;
pub mod supervisor;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
