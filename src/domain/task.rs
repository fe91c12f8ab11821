use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskAction {
    Start,
    Stop,
    Restart,
    Backup,
    Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    #[serde(rename = "serverId")]
    pub server_id: String,
    pub name: String,
    pub schedule: String,
    pub action: TaskAction,
    pub payload: serde_json::Value,
    pub enabled: bool,
    #[serde(rename = "lastRunAt")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(rename = "nextRunAt")]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(rename = "runCount")]
    pub run_count: i64,
    #[serde(rename = "lastStatus")]
    pub last_status: Option<TaskStatus>,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
}
