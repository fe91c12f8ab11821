//! In-memory `PersistencePort` fake for tests. Mirrors the teacher's own
//! test-setup convention of swapping a fake store in rather than pointing
//! tests at a real database (see `agent/tests.rs`'s mock registry).

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::alert::{AlertRuleType, DeliveryStatus};
use crate::domain::task::TaskStatus;
use crate::domain::{
    Alert, AlertDelivery, AlertRule, Backup, Node, NodeMetrics, ScheduledTask, Server,
    ServerAccess, ServerLog, ServerMetrics, ServerStatus,
};
use crate::ports::persistence::{PersistenceError, PersistencePort, PersistenceResult};

#[derive(Default)]
struct Store {
    nodes: Vec<Node>,
    servers: Vec<Server>,
    access: Vec<ServerAccess>,
    logs: Vec<ServerLog>,
    server_metrics: Vec<ServerMetrics>,
    node_metrics: Vec<NodeMetrics>,
    backups: Vec<Backup>,
    tasks: Vec<ScheduledTask>,
    alert_rules: Vec<AlertRule>,
    alerts: Vec<Alert>,
    deliveries: Vec<AlertDelivery>,
}

/// Thread-safe in-memory store. Cheap to construct per test; never used
/// outside `#[cfg(test)]` or integration test binaries.
pub struct MemoryPersistence {
    store: Mutex<Store>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(Store::default()),
        }
    }

    pub fn seed_node(&self, node: Node) {
        self.store.lock().unwrap().nodes.push(node);
    }

    pub fn seed_server(&self, server: Server) {
        self.store.lock().unwrap().servers.push(server);
    }

    pub fn seed_alert_rule(&self, rule: AlertRule) {
        self.store.lock().unwrap().alert_rules.push(rule);
    }

    pub fn seed_task(&self, task: ScheduledTask) {
        self.store.lock().unwrap().tasks.push(task);
    }

    /// Server logs appended so far, for tests to inspect (e.g. the
    /// illegal-transition audit line).
    pub fn logs_for_server(&self, server_id: &str) -> Vec<ServerLog> {
        self.store
            .lock()
            .unwrap()
            .logs
            .iter()
            .filter(|l| l.server_id == server_id)
            .cloned()
            .collect()
    }

    /// Alerts recorded so far, for tests to inspect dedup/delivery outcomes.
    pub fn all_alerts(&self) -> Vec<Alert> {
        self.store.lock().unwrap().alerts.clone()
    }

    /// Deliveries recorded so far, for tests to inspect retry outcomes.
    pub fn all_deliveries(&self) -> Vec<AlertDelivery> {
        self.store.lock().unwrap().deliveries.clone()
    }
}

impl Default for MemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistencePort for MemoryPersistence {
    async fn find_node(&self, id: &str) -> PersistenceResult<Option<Node>> {
        Ok(self.store.lock().unwrap().nodes.iter().find(|n| n.id == id).cloned())
    }

    async fn set_node_online(&self, id: &str, online: bool) -> PersistenceResult<()> {
        let mut store = self.store.lock().unwrap();
        let node = store.nodes.iter_mut().find(|n| n.id == id).ok_or(PersistenceError::NotFound)?;
        node.is_online = online;
        Ok(())
    }

    async fn touch_node_last_seen(&self, id: &str, at: DateTime<Utc>) -> PersistenceResult<()> {
        let mut store = self.store.lock().unwrap();
        let node = store.nodes.iter_mut().find(|n| n.id == id).ok_or(PersistenceError::NotFound)?;
        node.last_seen_at = Some(at);
        Ok(())
    }

    async fn list_nodes(&self) -> PersistenceResult<Vec<Node>> {
        Ok(self.store.lock().unwrap().nodes.clone())
    }

    async fn find_server_by_id(&self, id: &str) -> PersistenceResult<Option<Server>> {
        Ok(self.store.lock().unwrap().servers.iter().find(|s| s.id == id).cloned())
    }

    async fn find_server_by_uuid_or_id(&self, x: &str) -> PersistenceResult<Option<Server>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .servers
            .iter()
            .find(|s| s.matches_identifier(x))
            .cloned())
    }

    async fn update_server_status(
        &self,
        id: &str,
        status: ServerStatus,
        container_id: Option<String>,
        container_name: Option<String>,
    ) -> PersistenceResult<()> {
        let mut store = self.store.lock().unwrap();
        let server = store
            .servers
            .iter_mut()
            .find(|s| s.matches_identifier(id))
            .ok_or(PersistenceError::NotFound)?;
        server.status = status;
        if container_id.is_some() {
            server.container_id = container_id;
        }
        if container_name.is_some() {
            server.container_name = container_name;
        }
        Ok(())
    }

    async fn increment_crash_count(&self, id: &str, at: DateTime<Utc>) -> PersistenceResult<i32> {
        let mut store = self.store.lock().unwrap();
        let server = store
            .servers
            .iter_mut()
            .find(|s| s.matches_identifier(id))
            .ok_or(PersistenceError::NotFound)?;
        server.crash_count += 1;
        server.last_crash_at = Some(at);
        Ok(server.crash_count)
    }

    async fn list_servers_by_status(&self, status: ServerStatus) -> PersistenceResult<Vec<Server>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .servers
            .iter()
            .filter(|s| s.status == status)
            .cloned()
            .collect())
    }

    async fn list_servers_by_node(&self, node_id: &str) -> PersistenceResult<Vec<Server>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .servers
            .iter()
            .filter(|s| s.node_id == node_id)
            .cloned()
            .collect())
    }

    async fn list_access_for_server(&self, server_id: &str) -> PersistenceResult<Vec<ServerAccess>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .access
            .iter()
            .filter(|a| a.server_id == server_id)
            .cloned()
            .collect())
    }

    async fn append_server_log(&self, log: ServerLog) -> PersistenceResult<()> {
        self.store.lock().unwrap().logs.push(log);
        Ok(())
    }

    async fn append_server_metrics(&self, metrics: ServerMetrics) -> PersistenceResult<()> {
        self.store.lock().unwrap().server_metrics.push(metrics);
        Ok(())
    }

    async fn latest_server_metrics(&self, server_id: &str) -> PersistenceResult<Option<ServerMetrics>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .server_metrics
            .iter()
            .filter(|m| m.server_id == server_id)
            .max_by_key(|m| m.ts)
            .cloned())
    }

    async fn append_node_metrics(&self, metrics: NodeMetrics) -> PersistenceResult<()> {
        self.store.lock().unwrap().node_metrics.push(metrics);
        Ok(())
    }

    async fn latest_node_metrics(&self, node_id: &str) -> PersistenceResult<Option<NodeMetrics>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .node_metrics
            .iter()
            .filter(|m| m.node_id == node_id)
            .max_by_key(|m| m.ts)
            .cloned())
    }

    async fn upsert_backup_by_id(&self, backup: Backup) -> PersistenceResult<()> {
        let mut store = self.store.lock().unwrap();
        if let Some(existing) = store.backups.iter_mut().find(|b| b.id == backup.id) {
            *existing = backup;
        } else {
            store.backups.push(backup);
        }
        Ok(())
    }

    async fn find_backup_by_server_and_name(
        &self,
        server_id: &str,
        name: &str,
    ) -> PersistenceResult<Option<Backup>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .backups
            .iter()
            .find(|b| b.server_id == server_id && b.name == name)
            .cloned())
    }

    async fn list_enabled_tasks(&self) -> PersistenceResult<Vec<ScheduledTask>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .tasks
            .iter()
            .filter(|t| t.enabled)
            .cloned()
            .collect())
    }

    async fn update_task_run_outcome(
        &self,
        id: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
        status: TaskStatus,
        error: Option<String>,
    ) -> PersistenceResult<()> {
        let mut store = self.store.lock().unwrap();
        let task = store.tasks.iter_mut().find(|t| t.id == id).ok_or(PersistenceError::NotFound)?;
        task.last_run_at = Some(last_run_at);
        task.next_run_at = next_run_at;
        task.run_count += 1;
        task.last_status = Some(status);
        task.last_error = error;
        Ok(())
    }

    async fn set_task_next_run(&self, id: &str, next_run_at: DateTime<Utc>) -> PersistenceResult<()> {
        let mut store = self.store.lock().unwrap();
        let task = store.tasks.iter_mut().find(|t| t.id == id).ok_or(PersistenceError::NotFound)?;
        task.next_run_at = Some(next_run_at);
        Ok(())
    }

    async fn list_enabled_alert_rules(&self) -> PersistenceResult<Vec<AlertRule>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .alert_rules
            .iter()
            .filter(|r| r.enabled)
            .cloned()
            .collect())
    }

    async fn create_alert(&self, mut alert: Alert) -> PersistenceResult<Alert> {
        if alert.id.is_empty() {
            alert.id = Uuid::new_v4().to_string();
        }
        let mut store = self.store.lock().unwrap();
        store.alerts.push(alert.clone());
        Ok(alert)
    }

    async fn find_alert_by_id(&self, id: &str) -> PersistenceResult<Option<Alert>> {
        Ok(self.store.lock().unwrap().alerts.iter().find(|a| a.id == id).cloned())
    }

    async fn find_unresolved_alert(
        &self,
        rule_id: Option<&str>,
        alert_type: AlertRuleType,
        target_key: &str,
        created_after: DateTime<Utc>,
    ) -> PersistenceResult<Option<Alert>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .alerts
            .iter()
            .find(|a| {
                !a.resolved
                    && a.alert_type == alert_type
                    && a.target_key() == target_key
                    && a.rule_id.as_deref() == rule_id
                    && a.created_at >= created_after
            })
            .cloned())
    }

    async fn resolve_alert(&self, id: &str, by: &str, at: DateTime<Utc>) -> PersistenceResult<()> {
        let mut store = self.store.lock().unwrap();
        let alert = store.alerts.iter_mut().find(|a| a.id == id).ok_or(PersistenceError::NotFound)?;
        alert.resolved = true;
        alert.resolved_at = Some(at);
        alert.resolved_by = Some(by.to_string());
        Ok(())
    }

    async fn create_delivery(&self, mut delivery: AlertDelivery) -> PersistenceResult<AlertDelivery> {
        if delivery.id.is_empty() {
            delivery.id = Uuid::new_v4().to_string();
        }
        let mut store = self.store.lock().unwrap();
        store.deliveries.push(delivery.clone());
        Ok(delivery)
    }

    async fn update_delivery_status(
        &self,
        id: &str,
        status: DeliveryStatus,
        attempts: i32,
        last_attempt_at: DateTime<Utc>,
        error: Option<String>,
    ) -> PersistenceResult<()> {
        let mut store = self.store.lock().unwrap();
        let delivery = store
            .deliveries
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or(PersistenceError::NotFound)?;
        delivery.status = status;
        delivery.attempts = attempts;
        delivery.last_attempt_at = Some(last_attempt_at);
        delivery.last_error = error;
        Ok(())
    }

    async fn list_retryable_deliveries(
        &self,
        max_attempts: i32,
        retry_cutoff: DateTime<Utc>,
        limit: i64,
    ) -> PersistenceResult<Vec<AlertDelivery>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .deliveries
            .iter()
            .filter(|d| {
                d.status == DeliveryStatus::Failed
                    && d.attempts < max_attempts
                    && d.last_attempt_at.map(|t| t <= retry_cutoff).unwrap_or(true)
            })
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            hostname: "host".to_string(),
            public_address: "10.0.0.1".to_string(),
            secret: "s3cr3t".to_string(),
            is_online: false,
            last_seen_at: None,
            max_memory_mb: 4096,
            max_cpu_cores: 2.0,
            location_id: None,
        }
    }

    #[tokio::test]
    async fn set_node_online_roundtrips() {
        let store = MemoryPersistence::new();
        store.seed_node(node("n1"));
        store.set_node_online("n1", true).await.unwrap();
        let found = store.find_node("n1").await.unwrap().unwrap();
        assert!(found.is_online);
    }

    #[tokio::test]
    async fn unknown_node_is_not_found() {
        let store = MemoryPersistence::new();
        assert!(store.find_node("missing").await.unwrap().is_none());
    }
}
