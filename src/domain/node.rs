use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A worker host running the Catalyst agent.
///
/// `is_online` is derived state: it MUST be `false` whenever no
/// authenticated agent connection currently exists for the node. The
/// Gateway is the only writer of this field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub hostname: String,
    #[serde(rename = "publicAddress")]
    pub public_address: String,
    /// Agent bearer token. Never serialized back to clients.
    #[serde(skip_serializing)]
    pub secret: String,
    #[serde(rename = "isOnline")]
    pub is_online: bool,
    #[serde(rename = "lastSeenAt")]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(rename = "maxMemoryMb")]
    pub max_memory_mb: i64,
    #[serde(rename = "maxCpuCores")]
    pub max_cpu_cores: f64,
    #[serde(rename = "locationId")]
    pub location_id: Option<String>,
}
