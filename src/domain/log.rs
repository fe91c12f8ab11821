use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
    System,
}

/// Append-only. Lifetime governed by the retention policy (external to
/// the core; the Persistence Port exposes only append + query).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerLog {
    #[serde(rename = "serverId")]
    pub server_id: String,
    pub stream: LogStream,
    pub data: String,
    pub ts: DateTime<Utc>,
}
