//! Glue between the supervisor and the bridge.

pub mod lifecycle_relay;

pub use lifecycle_relay::spawn_lifecycle_relay;
