use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerMetrics {
    #[serde(rename = "serverId")]
    pub server_id: String,
    pub ts: DateTime<Utc>,
    #[serde(rename = "cpuPercent")]
    pub cpu_percent: f64,
    #[serde(rename = "memoryUsageMb")]
    pub memory_usage_mb: i64,
    #[serde(rename = "diskUsageMb")]
    pub disk_usage_mb: i64,
    #[serde(rename = "diskIoMb")]
    pub disk_io_mb: i64,
    #[serde(rename = "networkRxBytes")]
    pub network_rx_bytes: i64,
    #[serde(rename = "networkTxBytes")]
    pub network_tx_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetrics {
    #[serde(rename = "nodeId")]
    pub node_id: String,
    pub ts: DateTime<Utc>,
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
    #[serde(rename = "networkRxBytes")]
    pub network_rx_bytes: i64,
    #[serde(rename = "networkTxBytes")]
    pub network_tx_bytes: i64,
    #[serde(rename = "containerCount")]
    pub container_count: i32,
}
