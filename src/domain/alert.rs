use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertRuleType {
    ResourceThreshold,
    NodeOffline,
    ServerCrashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertTarget {
    Global,
    Server,
    Node,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertConditions {
    #[serde(rename = "cpuThreshold", skip_serializing_if = "Option::is_none")]
    pub cpu_threshold: Option<f64>,
    #[serde(rename = "memoryThreshold", skip_serializing_if = "Option::is_none")]
    pub memory_threshold: Option<f64>,
    #[serde(rename = "diskThreshold", skip_serializing_if = "Option::is_none")]
    pub disk_threshold: Option<f64>,
    #[serde(
        rename = "offlineThresholdSec",
        skip_serializing_if = "Option::is_none"
    )]
    pub offline_threshold_sec: Option<i64>,
    #[serde(
        rename = "cooldownMinutes",
        skip_serializing_if = "Option::is_none"
    )]
    pub cooldown_minutes: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertActions {
    #[serde(default)]
    pub webhooks: Vec<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(rename = "notifyOwner", default)]
    pub notify_owner: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub rule_type: AlertRuleType,
    pub target: AlertTarget,
    #[serde(rename = "targetId")]
    pub target_id: Option<String>,
    pub conditions: AlertConditions,
    pub actions: AlertActions,
    pub enabled: bool,
}

impl AlertRule {
    pub fn cooldown_minutes(&self) -> i64 {
        self.conditions.cooldown_minutes.unwrap_or(5)
    }

    /// The key a cooldown lookup is scoped to — `(ruleId, type, targetKey)`
    /// per the resolution of spec.md §9's cooldown Open Question, not the
    /// legacy `title`-based key.
    pub fn target_key(&self) -> String {
        match self.target {
            AlertTarget::Global => "global".to_string(),
            AlertTarget::Server | AlertTarget::Node => {
                self.target_id.clone().unwrap_or_else(|| "global".to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(rename = "ruleId")]
    pub rule_id: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    #[serde(rename = "serverId")]
    pub server_id: Option<String>,
    #[serde(rename = "nodeId")]
    pub node_id: Option<String>,
    #[serde(rename = "type")]
    pub alert_type: AlertRuleType,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub metadata: serde_json::Value,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    #[serde(rename = "resolvedAt")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(rename = "resolvedBy")]
    pub resolved_by: Option<String>,
}

impl Alert {
    /// The target half of the `(ruleId, type, targetKey)` dedup key.
    pub fn target_key(&self) -> String {
        self.server_id
            .clone()
            .or_else(|| self.node_id.clone())
            .unwrap_or_else(|| "global".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryChannel {
    Webhook,
    Email,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertDelivery {
    pub id: String,
    #[serde(rename = "alertId")]
    pub alert_id: String,
    pub channel: DeliveryChannel,
    pub target: String,
    pub status: DeliveryStatus,
    pub attempts: i32,
    #[serde(rename = "lastAttemptAt")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
}
