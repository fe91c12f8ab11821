//! `SqlitePool`-backed `PersistencePort`. Raw SQL with `sqlx::query`/
//! `Row::get`, in the style of the teacher's `db.rs` and
//! `agent/persistence.rs` (`ON CONFLICT DO UPDATE`, JSON blobs in TEXT
//! columns) rather than an ORM or a separate migration framework.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{sqlite::SqliteConnectOptions, Row, SqlitePool};

use crate::domain::alert::{AlertRuleType, DeliveryStatus};
use crate::domain::task::TaskStatus;
use crate::domain::{
    Alert, AlertDelivery, AlertRule, Backup, Node, NodeMetrics, ScheduledTask, Server,
    ServerAccess, ServerLog, ServerMetrics, ServerStatus,
};
use crate::ports::persistence::{PersistenceError, PersistencePort, PersistenceResult};

pub struct SqlxPersistence {
    pool: SqlitePool,
}

/// Serializes a unit-ish enum to its bare serde string representation
/// (e.g. `ServerStatus::Running` -> `"RUNNING"`), for storage in a TEXT
/// column without dragging in quotes.
fn enum_to_text<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value).expect("enum serialization is infallible") {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

fn text_to_enum<T: DeserializeOwned>(text: &str) -> anyhow::Result<T> {
    Ok(serde_json::from_value(serde_json::Value::String(
        text.to_string(),
    ))?)
}

fn parse_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

impl SqlxPersistence {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
        for statement in include_str!("schema.sql").split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(pool).await?;
        }
        Ok(())
    }

    fn row_to_node(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Node> {
        Ok(Node {
            id: row.get("id"),
            hostname: row.get("hostname"),
            public_address: row.get("public_address"),
            secret: row.get("secret"),
            is_online: row.get::<i64, _>("is_online") != 0,
            last_seen_at: parse_ts(row.get("last_seen_at")),
            max_memory_mb: row.get("max_memory_mb"),
            max_cpu_cores: row.get("max_cpu_cores"),
            location_id: row.get("location_id"),
        })
    }

    fn row_to_server(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Server> {
        Ok(Server {
            id: row.get("id"),
            uuid: row.get("uuid"),
            owner_id: row.get("owner_id"),
            node_id: row.get("node_id"),
            template_id: row.get("template_id"),
            status: text_to_enum(&row.get::<String, _>("status"))?,
            allocated_memory_mb: row.get("allocated_memory_mb"),
            allocated_cpu_cores: row.get("allocated_cpu_cores"),
            allocated_disk_mb: row.get("allocated_disk_mb"),
            primary_ip: row.get("primary_ip"),
            primary_port: row.get("primary_port"),
            port_bindings: serde_json::from_str(&row.get::<String, _>("port_bindings"))
                .unwrap_or_default(),
            network_mode: row.get("network_mode"),
            environment: serde_json::from_str(&row.get::<String, _>("environment"))
                .unwrap_or_default(),
            restart_policy: text_to_enum(&row.get::<String, _>("restart_policy"))?,
            crash_count: row.get("crash_count"),
            max_crash_count: row.get("max_crash_count"),
            last_crash_at: parse_ts(row.get("last_crash_at")),
            suspended_at: parse_ts(row.get("suspended_at")),
            suspension_reason: row.get("suspension_reason"),
            container_id: row.get("container_id"),
            container_name: row.get("container_name"),
        })
    }

    fn row_to_backup(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Backup> {
        Ok(Backup {
            id: row.get("id"),
            server_id: row.get("server_id"),
            name: row.get("name"),
            path: row.get("path"),
            size_mb: row.get("size_mb"),
            checksum: row.get("checksum"),
            storage_mode: text_to_enum(&row.get::<String, _>("storage_mode"))?,
            metadata: serde_json::from_str(&row.get::<String, _>("metadata")).unwrap_or_default(),
            created_at: parse_ts(row.get("created_at")).unwrap_or_else(Utc::now),
            restored_at: parse_ts(row.get("restored_at")),
        })
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<ScheduledTask> {
        Ok(ScheduledTask {
            id: row.get("id"),
            server_id: row.get("server_id"),
            name: row.get("name"),
            schedule: row.get("schedule"),
            action: text_to_enum(&row.get::<String, _>("action"))?,
            payload: serde_json::from_str(&row.get::<String, _>("payload")).unwrap_or_default(),
            enabled: row.get::<i64, _>("enabled") != 0,
            last_run_at: parse_ts(row.get("last_run_at")),
            next_run_at: parse_ts(row.get("next_run_at")),
            run_count: row.get("run_count"),
            last_status: row
                .get::<Option<String>, _>("last_status")
                .map(|s| text_to_enum(&s))
                .transpose()?,
            last_error: row.get("last_error"),
        })
    }

    fn row_to_alert_rule(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<AlertRule> {
        Ok(AlertRule {
            id: row.get("id"),
            user_id: row.get("user_id"),
            name: row.get("name"),
            description: row.get("description"),
            rule_type: text_to_enum(&row.get::<String, _>("type"))?,
            target: text_to_enum(&row.get::<String, _>("target"))?,
            target_id: row.get("target_id"),
            conditions: serde_json::from_str(&row.get::<String, _>("conditions"))
                .unwrap_or_default(),
            actions: serde_json::from_str(&row.get::<String, _>("actions")).unwrap_or_default(),
            enabled: row.get::<i64, _>("enabled") != 0,
        })
    }

    fn row_to_alert(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Alert> {
        Ok(Alert {
            id: row.get("id"),
            rule_id: row.get("rule_id"),
            user_id: row.get("user_id"),
            server_id: row.get("server_id"),
            node_id: row.get("node_id"),
            alert_type: text_to_enum(&row.get::<String, _>("type"))?,
            severity: text_to_enum(&row.get::<String, _>("severity"))?,
            title: row.get("title"),
            message: row.get("message"),
            metadata: serde_json::from_str(&row.get::<String, _>("metadata")).unwrap_or_default(),
            created_at: parse_ts(row.get("created_at")).unwrap_or_else(Utc::now),
            resolved: row.get::<i64, _>("resolved") != 0,
            resolved_at: parse_ts(row.get("resolved_at")),
            resolved_by: row.get("resolved_by"),
        })
    }

    fn row_to_delivery(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<AlertDelivery> {
        Ok(AlertDelivery {
            id: row.get("id"),
            alert_id: row.get("alert_id"),
            channel: text_to_enum(&row.get::<String, _>("channel"))?,
            target: row.get("target"),
            status: text_to_enum(&row.get::<String, _>("status"))?,
            attempts: row.get("attempts"),
            last_attempt_at: parse_ts(row.get("last_attempt_at")),
            last_error: row.get("last_error"),
        })
    }
}

#[async_trait]
impl PersistencePort for SqlxPersistence {
    async fn find_node(&self, id: &str) -> PersistenceResult<Option<Node>> {
        let row = sqlx::query("SELECT * FROM nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PersistenceError::Storage(e.into()))?;
        row.map(|r| Self::row_to_node(&r).map_err(PersistenceError::Storage))
            .transpose()
    }

    async fn set_node_online(&self, id: &str, online: bool) -> PersistenceResult<()> {
        sqlx::query("UPDATE nodes SET is_online = ? WHERE id = ?")
            .bind(online)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| PersistenceError::Storage(e.into()))?;
        Ok(())
    }

    async fn touch_node_last_seen(&self, id: &str, at: DateTime<Utc>) -> PersistenceResult<()> {
        sqlx::query("UPDATE nodes SET last_seen_at = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| PersistenceError::Storage(e.into()))?;
        Ok(())
    }

    async fn list_nodes(&self) -> PersistenceResult<Vec<Node>> {
        let rows = sqlx::query("SELECT * FROM nodes")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PersistenceError::Storage(e.into()))?;
        rows.iter()
            .map(|r| Self::row_to_node(r).map_err(PersistenceError::Storage))
            .collect()
    }

    async fn find_server_by_id(&self, id: &str) -> PersistenceResult<Option<Server>> {
        let row = sqlx::query("SELECT * FROM servers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PersistenceError::Storage(e.into()))?;
        row.map(|r| Self::row_to_server(&r).map_err(PersistenceError::Storage))
            .transpose()
    }

    async fn find_server_by_uuid_or_id(&self, x: &str) -> PersistenceResult<Option<Server>> {
        let row = sqlx::query("SELECT * FROM servers WHERE id = ? OR uuid = ?")
            .bind(x)
            .bind(x)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PersistenceError::Storage(e.into()))?;
        row.map(|r| Self::row_to_server(&r).map_err(PersistenceError::Storage))
            .transpose()
    }

    async fn update_server_status(
        &self,
        id: &str,
        status: ServerStatus,
        container_id: Option<String>,
        container_name: Option<String>,
    ) -> PersistenceResult<()> {
        sqlx::query(
            "UPDATE servers SET status = ?,
                container_id = COALESCE(?, container_id),
                container_name = COALESCE(?, container_name)
             WHERE id = ? OR uuid = ?",
        )
        .bind(enum_to_text(&status))
        .bind(container_id)
        .bind(container_name)
        .bind(id)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Storage(e.into()))?;
        Ok(())
    }

    async fn increment_crash_count(&self, id: &str, at: DateTime<Utc>) -> PersistenceResult<i32> {
        sqlx::query(
            "UPDATE servers SET crash_count = crash_count + 1, last_crash_at = ?
             WHERE id = ? OR uuid = ?",
        )
        .bind(at.to_rfc3339())
        .bind(id)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Storage(e.into()))?;

        let row = sqlx::query("SELECT crash_count FROM servers WHERE id = ? OR uuid = ?")
            .bind(id)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PersistenceError::Storage(e.into()))?;
        Ok(row.get("crash_count"))
    }

    async fn list_servers_by_status(&self, status: ServerStatus) -> PersistenceResult<Vec<Server>> {
        let rows = sqlx::query("SELECT * FROM servers WHERE status = ?")
            .bind(enum_to_text(&status))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PersistenceError::Storage(e.into()))?;
        rows.iter()
            .map(|r| Self::row_to_server(r).map_err(PersistenceError::Storage))
            .collect()
    }

    async fn list_servers_by_node(&self, node_id: &str) -> PersistenceResult<Vec<Server>> {
        let rows = sqlx::query("SELECT * FROM servers WHERE node_id = ?")
            .bind(node_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PersistenceError::Storage(e.into()))?;
        rows.iter()
            .map(|r| Self::row_to_server(r).map_err(PersistenceError::Storage))
            .collect()
    }

    async fn list_access_for_server(&self, server_id: &str) -> PersistenceResult<Vec<ServerAccess>> {
        let rows = sqlx::query("SELECT * FROM server_access WHERE server_id = ?")
            .bind(server_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PersistenceError::Storage(e.into()))?;
        Ok(rows
            .iter()
            .map(|r| ServerAccess {
                user_id: r.get("user_id"),
                server_id: r.get("server_id"),
                permissions: serde_json::from_str(&r.get::<String, _>("permissions"))
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn append_server_log(&self, log: ServerLog) -> PersistenceResult<()> {
        sqlx::query("INSERT INTO server_logs (server_id, stream, data, ts) VALUES (?, ?, ?, ?)")
            .bind(&log.server_id)
            .bind(enum_to_text(&log.stream))
            .bind(&log.data)
            .bind(log.ts.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| PersistenceError::Storage(e.into()))?;
        Ok(())
    }

    async fn append_server_metrics(&self, metrics: ServerMetrics) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO server_metrics
                (server_id, ts, cpu_percent, memory_usage_mb, disk_usage_mb, disk_io_mb, network_rx_bytes, network_tx_bytes)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&metrics.server_id)
        .bind(metrics.ts.to_rfc3339())
        .bind(metrics.cpu_percent)
        .bind(metrics.memory_usage_mb)
        .bind(metrics.disk_usage_mb)
        .bind(metrics.disk_io_mb)
        .bind(metrics.network_rx_bytes)
        .bind(metrics.network_tx_bytes)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Storage(e.into()))?;
        Ok(())
    }

    async fn latest_server_metrics(&self, server_id: &str) -> PersistenceResult<Option<ServerMetrics>> {
        let row = sqlx::query(
            "SELECT * FROM server_metrics WHERE server_id = ? ORDER BY ts DESC LIMIT 1",
        )
        .bind(server_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PersistenceError::Storage(e.into()))?;
        Ok(row.map(|r| ServerMetrics {
            server_id: r.get("server_id"),
            ts: parse_ts(r.get("ts")).unwrap_or_else(Utc::now),
            cpu_percent: r.get("cpu_percent"),
            memory_usage_mb: r.get("memory_usage_mb"),
            disk_usage_mb: r.get("disk_usage_mb"),
            disk_io_mb: r.get("disk_io_mb"),
            network_rx_bytes: r.get("network_rx_bytes"),
            network_tx_bytes: r.get("network_tx_bytes"),
        }))
    }

    async fn append_node_metrics(&self, metrics: NodeMetrics) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO node_metrics
                (node_id, ts, cpu_percent, memory_usage_mb, memory_total_mb, disk_usage_mb, disk_total_mb, network_rx_bytes, network_tx_bytes, container_count)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&metrics.node_id)
        .bind(metrics.ts.to_rfc3339())
        .bind(metrics.cpu_percent)
        .bind(metrics.memory_usage_mb)
        .bind(metrics.memory_total_mb)
        .bind(metrics.disk_usage_mb)
        .bind(metrics.disk_total_mb)
        .bind(metrics.network_rx_bytes)
        .bind(metrics.network_tx_bytes)
        .bind(metrics.container_count)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Storage(e.into()))?;
        Ok(())
    }

    async fn latest_node_metrics(&self, node_id: &str) -> PersistenceResult<Option<NodeMetrics>> {
        let row = sqlx::query(
            "SELECT * FROM node_metrics WHERE node_id = ? ORDER BY ts DESC LIMIT 1",
        )
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PersistenceError::Storage(e.into()))?;
        Ok(row.map(|r| NodeMetrics {
            node_id: r.get("node_id"),
            ts: parse_ts(r.get("ts")).unwrap_or_else(Utc::now),
            cpu_percent: r.get("cpu_percent"),
            memory_usage_mb: r.get("memory_usage_mb"),
            memory_total_mb: r.get("memory_total_mb"),
            disk_usage_mb: r.get("disk_usage_mb"),
            disk_total_mb: r.get("disk_total_mb"),
            network_rx_bytes: r.get("network_rx_bytes"),
            network_tx_bytes: r.get("network_tx_bytes"),
            container_count: r.get("container_count"),
        }))
    }

    async fn upsert_backup_by_id(&self, backup: Backup) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO backups (id, server_id, name, path, size_mb, checksum, storage_mode, metadata, created_at, restored_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                server_id = excluded.server_id,
                name = excluded.name,
                path = excluded.path,
                size_mb = excluded.size_mb,
                checksum = excluded.checksum,
                storage_mode = excluded.storage_mode,
                metadata = excluded.metadata,
                restored_at = excluded.restored_at",
        )
        .bind(&backup.id)
        .bind(&backup.server_id)
        .bind(&backup.name)
        .bind(&backup.path)
        .bind(backup.size_mb)
        .bind(&backup.checksum)
        .bind(enum_to_text(&backup.storage_mode))
        .bind(serde_json::to_string(&backup.metadata).unwrap_or_else(|_| "{}".to_string()))
        .bind(backup.created_at.to_rfc3339())
        .bind(backup.restored_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Storage(e.into()))?;
        Ok(())
    }

    async fn find_backup_by_server_and_name(
        &self,
        server_id: &str,
        name: &str,
    ) -> PersistenceResult<Option<Backup>> {
        let row = sqlx::query("SELECT * FROM backups WHERE server_id = ? AND name = ?")
            .bind(server_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PersistenceError::Storage(e.into()))?;
        row.map(|r| Self::row_to_backup(&r).map_err(PersistenceError::Storage))
            .transpose()
    }

    async fn list_enabled_tasks(&self) -> PersistenceResult<Vec<ScheduledTask>> {
        let rows = sqlx::query("SELECT * FROM scheduled_tasks WHERE enabled = 1")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PersistenceError::Storage(e.into()))?;
        rows.iter()
            .map(|r| Self::row_to_task(r).map_err(PersistenceError::Storage))
            .collect()
    }

    async fn update_task_run_outcome(
        &self,
        id: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
        status: TaskStatus,
        error: Option<String>,
    ) -> PersistenceResult<()> {
        sqlx::query(
            "UPDATE scheduled_tasks SET
                last_run_at = ?, next_run_at = ?, run_count = run_count + 1,
                last_status = ?, last_error = ?
             WHERE id = ?",
        )
        .bind(last_run_at.to_rfc3339())
        .bind(next_run_at.map(|t| t.to_rfc3339()))
        .bind(enum_to_text(&status))
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Storage(e.into()))?;
        Ok(())
    }

    async fn set_task_next_run(&self, id: &str, next_run_at: DateTime<Utc>) -> PersistenceResult<()> {
        sqlx::query("UPDATE scheduled_tasks SET next_run_at = ? WHERE id = ?")
            .bind(next_run_at.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| PersistenceError::Storage(e.into()))?;
        Ok(())
    }

    async fn list_enabled_alert_rules(&self) -> PersistenceResult<Vec<AlertRule>> {
        let rows = sqlx::query("SELECT * FROM alert_rules WHERE enabled = 1")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PersistenceError::Storage(e.into()))?;
        rows.iter()
            .map(|r| Self::row_to_alert_rule(r).map_err(PersistenceError::Storage))
            .collect()
    }

    async fn create_alert(&self, mut alert: Alert) -> PersistenceResult<Alert> {
        if alert.id.is_empty() {
            alert.id = uuid::Uuid::new_v4().to_string();
        }
        sqlx::query(
            "INSERT INTO alerts
                (id, rule_id, user_id, server_id, node_id, type, severity, title, message, metadata, created_at, resolved, resolved_at, resolved_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&alert.id)
        .bind(&alert.rule_id)
        .bind(&alert.user_id)
        .bind(&alert.server_id)
        .bind(&alert.node_id)
        .bind(enum_to_text(&alert.alert_type))
        .bind(enum_to_text(&alert.severity))
        .bind(&alert.title)
        .bind(&alert.message)
        .bind(serde_json::to_string(&alert.metadata).unwrap_or_else(|_| "{}".to_string()))
        .bind(alert.created_at.to_rfc3339())
        .bind(alert.resolved)
        .bind(alert.resolved_at.map(|t| t.to_rfc3339()))
        .bind(&alert.resolved_by)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Storage(e.into()))?;
        Ok(alert)
    }

    async fn find_alert_by_id(&self, id: &str) -> PersistenceResult<Option<Alert>> {
        let row = sqlx::query("SELECT * FROM alerts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PersistenceError::Storage(e.into()))?;
        row.map(|r| Self::row_to_alert(&r).map_err(PersistenceError::Storage))
            .transpose()
    }

    async fn find_unresolved_alert(
        &self,
        rule_id: Option<&str>,
        alert_type: AlertRuleType,
        target_key: &str,
        created_after: DateTime<Utc>,
    ) -> PersistenceResult<Option<Alert>> {
        let row = sqlx::query(
            "SELECT * FROM alerts
             WHERE resolved = 0 AND type = ?
               AND (rule_id IS ? OR rule_id = ?)
               AND (server_id = ? OR node_id = ? OR (server_id IS NULL AND node_id IS NULL AND ? = 'global'))
               AND created_at >= ?
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(enum_to_text(&alert_type))
        .bind(rule_id)
        .bind(rule_id)
        .bind(target_key)
        .bind(target_key)
        .bind(target_key)
        .bind(created_after.to_rfc3339())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PersistenceError::Storage(e.into()))?;
        row.map(|r| Self::row_to_alert(&r).map_err(PersistenceError::Storage))
            .transpose()
    }

    async fn resolve_alert(&self, id: &str, by: &str, at: DateTime<Utc>) -> PersistenceResult<()> {
        sqlx::query(
            "UPDATE alerts SET resolved = 1, resolved_at = ?, resolved_by = ? WHERE id = ?",
        )
        .bind(at.to_rfc3339())
        .bind(by)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Storage(e.into()))?;
        Ok(())
    }

    async fn create_delivery(&self, mut delivery: AlertDelivery) -> PersistenceResult<AlertDelivery> {
        if delivery.id.is_empty() {
            delivery.id = uuid::Uuid::new_v4().to_string();
        }
        sqlx::query(
            "INSERT INTO alert_deliveries
                (id, alert_id, channel, target, status, attempts, last_attempt_at, last_error)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&delivery.id)
        .bind(&delivery.alert_id)
        .bind(enum_to_text(&delivery.channel))
        .bind(&delivery.target)
        .bind(enum_to_text(&delivery.status))
        .bind(delivery.attempts)
        .bind(delivery.last_attempt_at.map(|t| t.to_rfc3339()))
        .bind(&delivery.last_error)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Storage(e.into()))?;
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
        sqlx::query(
            "UPDATE alert_deliveries SET status = ?, attempts = ?, last_attempt_at = ?, last_error = ? WHERE id = ?",
        )
        .bind(enum_to_text(&status))
        .bind(attempts)
        .bind(last_attempt_at.to_rfc3339())
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Storage(e.into()))?;
        Ok(())
    }

    async fn list_retryable_deliveries(
        &self,
        max_attempts: i32,
        retry_cutoff: DateTime<Utc>,
        limit: i64,
    ) -> PersistenceResult<Vec<AlertDelivery>> {
        let rows = sqlx::query(
            "SELECT * FROM alert_deliveries
             WHERE status = ? AND attempts < ?
               AND (last_attempt_at IS NULL OR last_attempt_at <= ?)
             LIMIT ?",
        )
        .bind(enum_to_text(&DeliveryStatus::Failed))
        .bind(max_attempts)
        .bind(retry_cutoff.to_rfc3339())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PersistenceError::Storage(e.into()))?;
        rows.iter()
            .map(|r| Self::row_to_delivery(r).map_err(PersistenceError::Storage))
            .collect()
    }
}
