//! Abstract contract over the relational store (spec.md §6). The core
//! never talks to `sqlx` directly outside `crate::persistence::sqlx_impl`;
//! every other module takes `Arc<dyn PersistencePort>`.
//!
//! Generalized from the teacher's direct `SqlitePool` free functions in
//! `db.rs`/`agent/persistence.rs` into a trait, per spec.md §9's "narrow
//! interfaces, inject rather than globalize" redesign flag.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Alert, AlertDelivery, AlertRule, Backup, Node, ScheduledTask, Server, ServerAccess,
    ServerLog, ServerStatus,
};
use crate::domain::metrics::{NodeMetrics, ServerMetrics};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("not found")]
    NotFound,
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

#[async_trait]
pub trait PersistencePort: Send + Sync {
    // --- Node ---
    async fn find_node(&self, id: &str) -> PersistenceResult<Option<Node>>;
    async fn set_node_online(&self, id: &str, online: bool) -> PersistenceResult<()>;
    async fn touch_node_last_seen(&self, id: &str, at: DateTime<Utc>) -> PersistenceResult<()>;
    async fn list_nodes(&self) -> PersistenceResult<Vec<Node>>;

    // --- Server ---
    async fn find_server_by_id(&self, id: &str) -> PersistenceResult<Option<Server>>;
    async fn find_server_by_uuid_or_id(&self, x: &str) -> PersistenceResult<Option<Server>>;
    async fn update_server_status(
        &self,
        id: &str,
        status: ServerStatus,
        container_id: Option<String>,
        container_name: Option<String>,
    ) -> PersistenceResult<()>;
    async fn increment_crash_count(&self, id: &str, at: DateTime<Utc>) -> PersistenceResult<i32>;
    async fn list_servers_by_status(&self, status: ServerStatus) -> PersistenceResult<Vec<Server>>;
    async fn list_servers_by_node(&self, node_id: &str) -> PersistenceResult<Vec<Server>>;

    // --- ServerAccess ---
    async fn list_access_for_server(&self, server_id: &str) -> PersistenceResult<Vec<ServerAccess>>;

    // --- ServerLog ---
    async fn append_server_log(&self, log: ServerLog) -> PersistenceResult<()>;

    // --- Metrics ---
    async fn append_server_metrics(&self, metrics: ServerMetrics) -> PersistenceResult<()>;
    async fn latest_server_metrics(&self, server_id: &str) -> PersistenceResult<Option<ServerMetrics>>;
    async fn append_node_metrics(&self, metrics: NodeMetrics) -> PersistenceResult<()>;
    async fn latest_node_metrics(&self, node_id: &str) -> PersistenceResult<Option<NodeMetrics>>;

    // --- Backup ---
    async fn upsert_backup_by_id(&self, backup: Backup) -> PersistenceResult<()>;
    async fn find_backup_by_server_and_name(
        &self,
        server_id: &str,
        name: &str,
    ) -> PersistenceResult<Option<Backup>>;

    // --- ScheduledTask ---
    async fn list_enabled_tasks(&self) -> PersistenceResult<Vec<ScheduledTask>>;
    async fn update_task_run_outcome(
        &self,
        id: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
        status: crate::domain::task::TaskStatus,
        error: Option<String>,
    ) -> PersistenceResult<()>;
    async fn set_task_next_run(&self, id: &str, next_run_at: DateTime<Utc>) -> PersistenceResult<()>;

    // --- AlertRule ---
    async fn list_enabled_alert_rules(&self) -> PersistenceResult<Vec<AlertRule>>;

    // --- Alert ---
    async fn create_alert(&self, alert: Alert) -> PersistenceResult<Alert>;
    async fn find_alert_by_id(&self, id: &str) -> PersistenceResult<Option<Alert>>;
    async fn find_unresolved_alert(
        &self,
        rule_id: Option<&str>,
        alert_type: crate::domain::alert::AlertRuleType,
        target_key: &str,
        created_after: DateTime<Utc>,
    ) -> PersistenceResult<Option<Alert>>;
    async fn resolve_alert(&self, id: &str, by: &str, at: DateTime<Utc>) -> PersistenceResult<()>;

    // --- AlertDelivery ---
    async fn create_delivery(&self, delivery: AlertDelivery) -> PersistenceResult<AlertDelivery>;
    async fn update_delivery_status(
        &self,
        id: &str,
        status: crate::domain::alert::DeliveryStatus,
        attempts: i32,
        last_attempt_at: DateTime<Utc>,
        error: Option<String>,
    ) -> PersistenceResult<()>;
    async fn list_retryable_deliveries(
        &self,
        max_attempts: i32,
        retry_cutoff: DateTime<Utc>,
        limit: i64,
    ) -> PersistenceResult<Vec<AlertDelivery>>;
}
