use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Legal lifecycle states for a managed server. See
/// [`crate::domain::state_machine`] for the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServerStatus {
    Stopped,
    Installing,
    Starting,
    Running,
    Stopping,
    Crashed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    Never,
    OnFailure,
    Always,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    pub uuid: String,
    #[serde(rename = "ownerId")]
    pub owner_id: String,
    #[serde(rename = "nodeId")]
    pub node_id: String,
    #[serde(rename = "templateId")]
    pub template_id: String,
    pub status: ServerStatus,
    #[serde(rename = "allocatedMemoryMb")]
    pub allocated_memory_mb: i64,
    #[serde(rename = "allocatedCpuCores")]
    pub allocated_cpu_cores: f64,
    #[serde(rename = "allocatedDiskMb")]
    pub allocated_disk_mb: i64,
    #[serde(rename = "primaryIp")]
    pub primary_ip: Option<String>,
    #[serde(rename = "primaryPort")]
    pub primary_port: Option<i32>,
    #[serde(rename = "portBindings")]
    pub port_bindings: serde_json::Value,
    #[serde(rename = "networkMode")]
    pub network_mode: String,
    pub environment: HashMap<String, String>,
    #[serde(rename = "restartPolicy")]
    pub restart_policy: RestartPolicy,
    #[serde(rename = "crashCount")]
    pub crash_count: i32,
    #[serde(rename = "maxCrashCount")]
    pub max_crash_count: i32,
    #[serde(rename = "lastCrashAt")]
    pub last_crash_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(rename = "suspendedAt")]
    pub suspended_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(rename = "suspensionReason")]
    pub suspension_reason: Option<String>,
    #[serde(rename = "containerId")]
    pub container_id: Option<String>,
    #[serde(rename = "containerName")]
    pub container_name: Option<String>,
}

impl Server {
    /// Resolve by either primary id or externally-visible uuid, per
    /// spec.md §3: "message routing MUST accept either as the server
    /// identifier."
    pub fn matches_identifier(&self, identifier: &str) -> bool {
        self.id == identifier || self.uuid == identifier
    }
}
