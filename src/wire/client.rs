//! Inbound/outbound client message types (spec.md §4.1, §6). Same
//! strict-tag discipline as [`super::agent`]: unknown `type` values are a
//! hard deserialize error, never a silently accepted catchall.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::log::LogStream;
use crate::domain::server::ServerStatus;
use crate::error::WireErrorCode;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServerControlAction {
    Start,
    Stop,
    Restart,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerControl {
    #[serde(rename = "serverId")]
    pub server_id: String,
    pub action: ServerControlAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleInput {
    #[serde(rename = "serverId")]
    pub server_id: String,
    pub data: String,
}

/// Closed set of messages a connected client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "server_control")]
    ServerControl(ServerControl),
    #[serde(rename = "console_input")]
    ConsoleInput(ConsoleInput),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientFrameError {
    #[error("missing \"type\" field")]
    MissingType,
    #[error("unknown client message type {0:?}")]
    UnknownType(String),
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ClientMessage {
    pub fn parse(value: Value) -> Result<Self, ClientFrameError> {
        let type_tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ClientFrameError::MissingType)?
            .to_string();
        serde_json::from_value(value).map_err(|_| ClientFrameError::UnknownType(type_tag))
    }
}

/// Fan-out of agent-reported console output to subscribed clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename = "console_output")]
pub struct ConsoleOutputEvent {
    #[serde(rename = "serverId")]
    pub server_id: String,
    pub stream: LogStream,
    pub data: String,
}

/// Fan-out of a server state transition to subscribed clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename = "server_state_update")]
pub struct ServerStateUpdateEvent {
    #[serde(rename = "serverId")]
    pub server_id: String,
    pub state: ServerStatus,
    pub reason: Option<String>,
}

/// Fan-out of agent-reported resource stats to subscribed clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename = "resource_stats")]
pub struct ResourceStatsEvent {
    #[serde(rename = "serverId")]
    pub server_id: String,
    #[serde(rename = "cpuPercent")]
    pub cpu_percent: f64,
    #[serde(rename = "memoryUsageMb")]
    pub memory_usage_mb: i64,
    #[serde(rename = "diskUsageMb")]
    pub disk_usage_mb: i64,
}

/// Fan-out of a completed backup to subscribed clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename = "backup_complete")]
pub struct BackupCompleteEvent {
    #[serde(rename = "serverId")]
    pub server_id: String,
    #[serde(rename = "backupId")]
    pub backup_id: String,
    #[serde(rename = "backupName")]
    pub backup_name: String,
}

/// Error response sent to a client whose request couldn't be routed,
/// using the stable codes in spec.md §6 (never a raw persistence/transport
/// error message, per spec.md §7).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename = "error")]
pub struct ErrorEvent {
    pub code: WireErrorCode,
    pub message: String,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}
