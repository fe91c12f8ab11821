use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    Local,
    S3,
    Sftp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backup {
    pub id: String,
    #[serde(rename = "serverId")]
    pub server_id: String,
    pub name: String,
    pub path: String,
    #[serde(rename = "sizeMb")]
    pub size_mb: i64,
    pub checksum: Option<String>,
    #[serde(rename = "storageMode")]
    pub storage_mode: StorageMode,
    pub metadata: serde_json::Value,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "restoredAt")]
    pub restored_at: Option<DateTime<Utc>>,
}
