//! Typed `data` shapes for `event` envelopes.

use serde::{Deserialize, Serialize};

/// One parsed chunk out of the engine's multiplexed log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogChunk {
    pub data: Vec<u8>,
    pub stream: LogStream,
}

/// `data` payload of a `log_data` event (spec §4.2 log streaming).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogDataEvent {
    pub container_id: String,
    pub stream_id: String,
    pub data: String,
    pub stream: LogStream,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// `data` payload of a `server_settings` event pushed to an agent after
/// registration (e.g. heartbeat interval overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettingsEvent {
    pub heartbeat_interval_seconds: u64,
    pub metrics_interval_seconds: u64,
}
