//! Inbound agent message types (spec.md §4.1's table) plus the handshake
//! reply and outbound command shapes. Generalizes the teacher's
//! `serde_json::Value` engine-event broadcast (`state.rs`'s `event_tx`)
//! into closed, strictly-validated variants per spec.md §9's redesign
//! flag: "the rewrite MUST use a tagged-variant type ... and reject
//! unknown tags."
//!
//! `*_response`/`*_chunk` frames (spec.md's wildcard rows) aren't a fixed
//! set of tags — any request-scoped reply can produce one — so they're
//! not part of the `#[serde(tag = "type")]` enum below. Instead
//! [`AgentMessage::parse`] inspects the raw `type` field first and routes
//! anything ending in `_response` or `_chunk` to [`ResponseFrame`] /
//! [`ChunkFrame`] before falling back to the closed enum, which rejects
//! anything else it doesn't recognize.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::log::LogStream;
use crate::domain::server::ServerStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStateUpdate {
    #[serde(alias = "serverId", alias = "uuid")]
    pub server_id: String,
    pub state: ServerStatus,
    pub reason: Option<String>,
    #[serde(rename = "containerId")]
    pub container_id: Option<String>,
    #[serde(rename = "containerName")]
    pub container_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleOutput {
    #[serde(alias = "serverId", alias = "uuid")]
    pub server_id: String,
    pub stream: LogStream,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceStats {
    #[serde(alias = "serverId", alias = "uuid")]
    pub server_id: String,
    #[serde(rename = "cpuPercent")]
    pub cpu_percent: f64,
    #[serde(rename = "memoryUsageMb")]
    pub memory_usage_mb: i64,
    #[serde(rename = "diskUsageMb")]
    pub disk_usage_mb: i64,
    #[serde(rename = "diskIoMb", default)]
    pub disk_io_mb: i64,
    #[serde(rename = "networkRxBytes", default)]
    pub network_rx_bytes: i64,
    #[serde(rename = "networkTxBytes", default)]
    pub network_tx_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    #[serde(rename = "cpuPercent")]
    pub cpu_percent: f64,
    #[serde(rename = "memoryUsageMb")]
    pub memory_usage_mb: i64,
    #[serde(rename = "memoryTotalMb")]
    pub memory_total_mb: i64,
    #[serde(rename = "diskUsageMb")]
    pub disk_usage_mb: i64,
    #[serde(rename = "diskTotalMb")]
    pub disk_total_mb: i64,
    #[serde(rename = "networkRxBytes", default)]
    pub network_rx_bytes: i64,
    #[serde(rename = "networkTxBytes", default)]
    pub network_tx_bytes: i64,
    #[serde(rename = "containerCount", default)]
    pub container_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupComplete {
    #[serde(rename = "serverId")]
    pub server_id: String,
    #[serde(rename = "backupId")]
    pub backup_id: Option<String>,
    #[serde(rename = "backupName")]
    pub backup_name: String,
    #[serde(rename = "backupPath")]
    pub backup_path: String,
    #[serde(rename = "sizeMb")]
    pub size_mb: i64,
    pub checksum: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRestoreComplete {
    #[serde(rename = "serverId")]
    pub server_id: String,
    #[serde(rename = "backupId")]
    pub backup_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupDeleteComplete {
    #[serde(rename = "serverId")]
    pub server_id: String,
    #[serde(rename = "backupId")]
    pub backup_id: String,
}

/// Closed set of fixed-tag inbound agent messages (spec.md §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentMessage {
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "console_output")]
    ConsoleOutput(ConsoleOutput),
    #[serde(rename = "server_state_update")]
    ServerStateUpdate(ServerStateUpdate),
    #[serde(rename = "resource_stats")]
    ResourceStats(ResourceStats),
    #[serde(rename = "health_report")]
    HealthReport(HealthReport),
    #[serde(rename = "backup_complete")]
    BackupComplete(BackupComplete),
    #[serde(rename = "backup_restore_complete")]
    BackupRestoreComplete(BackupRestoreComplete),
    #[serde(rename = "backup_delete_complete")]
    BackupDeleteComplete(BackupDeleteComplete),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkFrame {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum InboundAgentFrame {
    Message(AgentMessage),
    Response(ResponseFrame),
    Chunk(ChunkFrame),
}

#[derive(Debug, thiserror::Error)]
pub enum AgentFrameError {
    #[error("missing \"type\" field")]
    MissingType,
    #[error("unknown agent message type {0:?}")]
    UnknownType(String),
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl InboundAgentFrame {
    /// Routes on the raw `type` field before falling back to strict
    /// enum deserialization, per the module doc above.
    pub fn parse(value: Value) -> Result<Self, AgentFrameError> {
        let type_tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(AgentFrameError::MissingType)?
            .to_string();

        if type_tag.ends_with("_response") {
            return Ok(InboundAgentFrame::Response(serde_json::from_value(value)?));
        }
        if type_tag.ends_with("_chunk") {
            return Ok(InboundAgentFrame::Chunk(serde_json::from_value(value)?));
        }

        match serde_json::from_value::<AgentMessage>(value) {
            Ok(msg) => Ok(InboundAgentFrame::Message(msg)),
            Err(_) => Err(AgentFrameError::UnknownType(type_tag)),
        }
    }
}

/// Outbound handshake reply sent to a newly admitted agent connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename = "node_handshake_response")]
pub struct NodeHandshakeResponse {
    pub success: bool,
    #[serde(rename = "backendAddress")]
    pub backend_address: String,
}

/// Outbound `start_server` command (auto-restart, scheduled task dispatch).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename = "start_server")]
pub struct StartServerCommand {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "serverId")]
    pub server_id: String,
    #[serde(rename = "templateId")]
    pub template_id: String,
    pub command: Option<String>,
    pub environment: std::collections::HashMap<String, String>,
    #[serde(rename = "allocatedMemoryMb")]
    pub allocated_memory_mb: i64,
    #[serde(rename = "allocatedCpuCores")]
    pub allocated_cpu_cores: f64,
    #[serde(rename = "portBindings")]
    pub port_bindings: Value,
    #[serde(rename = "networkMode")]
    pub network_mode: String,
}
