//! Alert Engine: evaluates resource-threshold rules on a fixed interval,
//! raises alerts for threshold/offline/crash conditions (the latter two
//! triggered by callers — see [`AlertEngine::raise`] — rather than
//! polled), and retries failed deliveries with backoff. Loop shape
//! grounded on the teacher's `main.rs` heartbeat-spawn `tokio::spawn`
//! loop; dedup/cooldown keying resolved in DESIGN.md's Open Question
//! section as `(ruleId, type, targetKey)`.

pub mod mail;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::domain::alert::{AlertRuleType, AlertSeverity, AlertTarget, DeliveryChannel, DeliveryStatus};
use crate::domain::{Alert, AlertDelivery, AlertRule};
use crate::domain::server::ServerStatus;
use crate::ports::clock::Clock;
use crate::ports::mailer::Mailer;
use crate::ports::notifier::ClientNotifier;
use crate::ports::persistence::PersistencePort;
use crate::ports::webhooks::Webhooks;

pub struct AlertEngine {
    persistence: Arc<dyn PersistencePort>,
    webhooks: Arc<dyn Webhooks>,
    mailer: Arc<dyn Mailer>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn ClientNotifier>,
    delivery_max_attempts: i32,
    delivery_retry_backoff: Duration,
}

impl AlertEngine {
    pub fn new(
        persistence: Arc<dyn PersistencePort>,
        webhooks: Arc<dyn Webhooks>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn ClientNotifier>,
        delivery_max_attempts: i32,
        delivery_retry_backoff: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            persistence,
            webhooks,
            mailer,
            clock,
            notifier,
            delivery_max_attempts,
            delivery_retry_backoff,
        })
    }

    /// Runs one evaluate+retry pass per `interval` until `shutdown`
    /// reports true, returning after the current iteration completes
    /// (spec.md §5's graceful-shutdown rule).
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.evaluate_resource_thresholds().await;
                    self.evaluate_node_offline().await;
                    self.evaluate_server_crashed().await;
                    self.retry_failed_deliveries().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("alert engine loop shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// spec.md §4.4 `node_offline`: nodes whose `lastSeenAt` is older than
    /// the rule's `offlineThresholdSec` (default 5 min), scoped to the
    /// rule's `targetId` if set.
    async fn evaluate_node_offline(&self) {
        let rules = match self.persistence.list_enabled_alert_rules().await {
            Ok(rules) => rules,
            Err(err) => {
                error!(error = %err, "failed to list alert rules for node_offline evaluation");
                return;
            }
        };
        let nodes = match self.persistence.list_nodes().await {
            Ok(nodes) => nodes,
            Err(err) => {
                error!(error = %err, "failed to list nodes for node_offline evaluation");
                return;
            }
        };
        let now = self.clock.now();

        for rule in rules.iter().filter(|r| r.rule_type == AlertRuleType::NodeOffline) {
            let threshold = chrono::Duration::seconds(rule.conditions.offline_threshold_sec.unwrap_or(300));
            for node in &nodes {
                if rule.target == AlertTarget::Node && rule.target_id.as_deref() != Some(node.id.as_str()) {
                    continue;
                }
                let stale = match node.last_seen_at {
                    Some(last_seen) => now.signed_duration_since(last_seen) > threshold,
                    None => true,
                };
                if !stale {
                    continue;
                }
                // node_offline dedupes on "an unresolved alert for this
                // (node, type) already exists" with no time bound at all —
                // a node that stays offline longer than any cooldown must
                // not get a fresh duplicate alert every evaluation pass.
                self.raise(
                    Some(&node.id),
                    None,
                    AlertRuleType::NodeOffline,
                    AlertSeverity::Critical,
                    format!("Node {} went offline", node.hostname),
                    format!("No heartbeat received from {} within {:?}", node.hostname, threshold.to_std().unwrap_or_default()),
                    chrono::DateTime::<chrono::Utc>::MIN_UTC,
                )
                .await;
            }
        }
    }

    /// spec.md §4.4 `server_crashed`: servers currently in `CRASHED`,
    /// scoped to the rule's `targetId` if set.
    async fn evaluate_server_crashed(&self) {
        let rules = match self.persistence.list_enabled_alert_rules().await {
            Ok(rules) => rules,
            Err(err) => {
                error!(error = %err, "failed to list alert rules for server_crashed evaluation");
                return;
            }
        };
        if rules.iter().all(|r| r.rule_type != AlertRuleType::ServerCrashed) {
            return;
        }
        let crashed = match self.persistence.list_servers_by_status(ServerStatus::Crashed).await {
            Ok(servers) => servers,
            Err(err) => {
                error!(error = %err, "failed to list crashed servers for server_crashed evaluation");
                return;
            }
        };

        for rule in rules.iter().filter(|r| r.rule_type == AlertRuleType::ServerCrashed) {
            for server in &crashed {
                if rule.target == AlertTarget::Server && rule.target_id.as_deref() != Some(server.id.as_str()) {
                    continue;
                }
                // server_crashed dedupes on "an unresolved alert exists
                // created after the server's lastCrashAt", not a fixed
                // cooldown — the dedup window is anchored to this crash,
                // so a new crash always gets its own alert.
                self.raise(
                    None,
                    Some(&server.id),
                    AlertRuleType::ServerCrashed,
                    AlertSeverity::Critical,
                    format!("Server {} crashed", server.id),
                    format!("Server {} transitioned to CRASHED (crash count {})", server.id, server.crash_count),
                    server.last_crash_at.unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC),
                )
                .await;
            }
        }
    }

    /// Finds the best-matching enabled rule for an alert type and
    /// optional target, preferring a target-specific rule over a global
    /// one. Returns `None` if no rule covers this condition at all, in
    /// which case the alert is still recorded but never delivered.
    async fn rule_for(&self, alert_type: AlertRuleType, target_id: Option<&str>) -> Option<AlertRule> {
        let rules = self.persistence.list_enabled_alert_rules().await.ok()?;
        rules
            .into_iter()
            .filter(|r| r.rule_type == alert_type)
            .find(|r| match (r.target, target_id) {
                (AlertTarget::Global, _) => true,
                (AlertTarget::Server, Some(id)) | (AlertTarget::Node, Some(id)) => {
                    r.target_id.as_deref() == Some(id)
                }
                _ => false,
            })
    }

    /// Raises an alert of `alert_type` for the given server/node. Dedupes
    /// against any unresolved alert for the same `(ruleId, type,
    /// targetKey)` created at or after `dedup_after` — the caller decides
    /// what that bound means for its alert type: a rolling cooldown window
    /// for resource thresholds, the server's `lastCrashAt` for crashes, or
    /// [`chrono::DateTime::MIN_UTC`] for an unconditional "one at a time"
    /// dedup like node_offline. Returns `None` when suppressed by dedup —
    /// the caller should treat that as "nothing to do".
    pub async fn raise(
        &self,
        node_id: Option<&str>,
        server_id: Option<&str>,
        alert_type: AlertRuleType,
        severity: AlertSeverity,
        title: String,
        message: String,
        dedup_after: chrono::DateTime<chrono::Utc>,
    ) -> Option<Alert> {
        let target_id = server_id.or(node_id);
        let rule = self.rule_for(alert_type, target_id).await;
        let target_key = target_id.map(str::to_string).unwrap_or_else(|| "global".to_string());
        let now = self.clock.now();

        let existing = self
            .persistence
            .find_unresolved_alert(rule.as_ref().map(|r| r.id.as_str()), alert_type, &target_key, dedup_after)
            .await
            .ok()
            .flatten();
        if existing.is_some() {
            return None;
        }

        let alert = Alert {
            id: String::new(),
            rule_id: rule.as_ref().map(|r| r.id.clone()),
            user_id: rule.as_ref().and_then(|r| r.user_id.clone()),
            server_id: server_id.map(str::to_string),
            node_id: node_id.map(str::to_string),
            alert_type,
            severity,
            title,
            message,
            metadata: serde_json::json!({}),
            created_at: now,
            resolved: false,
            resolved_at: None,
            resolved_by: None,
        };

        let created = match self.persistence.create_alert(alert).await {
            Ok(created) => created,
            Err(err) => {
                error!(error = %err, "failed to persist alert");
                return None;
            }
        };

        if let Some(rule) = &rule {
            self.dispatch_deliveries(&created, rule).await;
        }

        Some(created)
    }

    async fn dispatch_deliveries(&self, alert: &Alert, rule: &AlertRule) {
        for url in &rule.actions.webhooks {
            self.create_and_attempt_delivery(alert, DeliveryChannel::Webhook, url.clone()).await;
        }
        for email in &rule.actions.emails {
            self.create_and_attempt_delivery(alert, DeliveryChannel::Email, email.clone()).await;
        }
        if rule.actions.notify_owner {
            self.notify_owner(alert).await;
        }
    }

    /// Pushes the alert to the resource owner's live sessions: the
    /// server's owner for a server-scoped alert, or the rule's creator
    /// otherwise. Best-effort — an offline owner simply misses the
    /// in-app notification; the durable record is the `Alert` row itself.
    async fn notify_owner(&self, alert: &Alert) {
        let owner_id = if let Some(server_id) = &alert.server_id {
            match self.persistence.find_server_by_id(server_id).await {
                Ok(Some(server)) => Some(server.owner_id),
                _ => alert.user_id.clone(),
            }
        } else {
            alert.user_id.clone()
        };

        if let Some(owner_id) = owner_id {
            self.notifier.notify_user(
                &owner_id,
                serde_json::json!({
                    "type": "alert",
                    "alertId": alert.id,
                    "severity": match alert.severity { AlertSeverity::Critical => "critical", AlertSeverity::Warning => "warning" },
                    "title": alert.title,
                    "message": alert.message,
                }),
            );
        }
    }

    async fn create_and_attempt_delivery(&self, alert: &Alert, channel: DeliveryChannel, target: String) {
        let delivery = AlertDelivery {
            id: String::new(),
            alert_id: alert.id.clone(),
            channel,
            target,
            status: DeliveryStatus::Pending,
            attempts: 0,
            last_attempt_at: None,
            last_error: None,
        };
        let delivery = match self.persistence.create_delivery(delivery).await {
            Ok(delivery) => delivery,
            Err(err) => {
                error!(error = %err, "failed to record alert delivery");
                return;
            }
        };
        self.attempt_delivery(alert, &delivery).await;
    }

    async fn attempt_delivery(&self, alert: &Alert, delivery: &AlertDelivery) {
        let result = match delivery.channel {
            DeliveryChannel::Webhook => {
                self.webhooks
                    .post(
                        &delivery.target,
                        serde_json::json!({
                            "title": alert.title,
                            "message": alert.message,
                            "severity": match alert.severity { AlertSeverity::Critical => "critical", AlertSeverity::Warning => "warning" },
                        }),
                    )
                    .await
            }
            DeliveryChannel::Email => {
                self.mailer
                    .send(&delivery.target, &alert.title, &alert.message)
                    .await
            }
        };

        let now = self.clock.now();
        let (status, error) = match result {
            Ok(()) => (DeliveryStatus::Sent, None),
            Err(err) => {
                warn!(delivery_id = %delivery.id, error = %err, "alert delivery attempt failed");
                (DeliveryStatus::Failed, Some(err.to_string()))
            }
        };

        if let Err(err) = self
            .persistence
            .update_delivery_status(&delivery.id, status, delivery.attempts + 1, now, error)
            .await
        {
            error!(error = %err, "failed to record delivery attempt outcome");
        }
    }

    /// Retries every delivery under `delivery_max_attempts` whose last
    /// attempt is older than `delivery_retry_backoff`.
    async fn retry_failed_deliveries(&self) {
        let cutoff = self.clock.now() - chrono::Duration::from_std(self.delivery_retry_backoff).unwrap_or_default();
        let retryable = match self
            .persistence
            .list_retryable_deliveries(self.delivery_max_attempts, cutoff, 100)
            .await
        {
            Ok(list) => list,
            Err(err) => {
                error!(error = %err, "failed to list retryable alert deliveries");
                return;
            }
        };

        for delivery in retryable {
            // A delivery whose alert has since vanished is skipped rather
            // than retried forever against nothing.
            match self.persistence.find_alert_by_id(&delivery.alert_id).await {
                Ok(Some(alert)) => self.attempt_delivery(&alert, &delivery).await,
                Ok(None) => warn!(delivery_id = %delivery.id, "retryable delivery references a missing alert"),
                Err(err) => error!(error = %err, "failed to load alert for delivery retry"),
            }
        }
    }

    /// One pass of resource-threshold evaluation: for every enabled
    /// `ResourceThreshold` rule, checks the relevant servers'/nodes'
    /// latest metrics against the rule's configured thresholds.
    async fn evaluate_resource_thresholds(&self) {
        let rules = match self.persistence.list_enabled_alert_rules().await {
            Ok(rules) => rules,
            Err(err) => {
                error!(error = %err, "failed to list alert rules for evaluation");
                return;
            }
        };

        for rule in rules.iter().filter(|r| r.rule_type == AlertRuleType::ResourceThreshold) {
            match rule.target {
                AlertTarget::Server => {
                    if let Some(server_id) = &rule.target_id {
                        self.evaluate_server_thresholds(rule, server_id).await;
                    }
                }
                AlertTarget::Node => {
                    if let Some(node_id) = &rule.target_id {
                        self.evaluate_node_thresholds(rule, node_id).await;
                    }
                }
                AlertTarget::Global => {
                    if let Ok(nodes) = self.persistence.list_nodes().await {
                        for node in nodes {
                            self.evaluate_node_thresholds(rule, &node.id).await;
                        }
                    }
                }
            }
        }
    }

    async fn evaluate_server_thresholds(&self, rule: &AlertRule, server_id: &str) {
        let server = match self.persistence.find_server_by_id(server_id).await {
            Ok(Some(server)) => server,
            _ => return,
        };
        let metrics = match self.persistence.latest_server_metrics(server_id).await {
            Ok(Some(metrics)) => metrics,
            _ => return,
        };

        let memory_pct = percent_of(metrics.memory_usage_mb, server.allocated_memory_mb);
        let disk_pct = percent_of(metrics.disk_usage_mb, server.allocated_disk_mb);

        let breach = rule.conditions.cpu_threshold.map(|t| metrics.cpu_percent >= t).unwrap_or(false)
            || rule.conditions.memory_threshold.map(|t| memory_pct >= t).unwrap_or(false)
            || rule.conditions.disk_threshold.map(|t| disk_pct >= t).unwrap_or(false);

        if breach {
            let cutoff = self.clock.now() - chrono::Duration::minutes(rule.cooldown_minutes());
            self.raise(
                None,
                Some(server_id),
                AlertRuleType::ResourceThreshold,
                AlertSeverity::Warning,
                format!("Resource threshold exceeded on server {server_id}"),
                format!(
                    "cpu={:.1}% memory={memory_pct:.1}% ({}/{}MB) disk={disk_pct:.1}% ({}/{}MB)",
                    metrics.cpu_percent, metrics.memory_usage_mb, server.allocated_memory_mb,
                    metrics.disk_usage_mb, server.allocated_disk_mb
                ),
                cutoff,
            )
            .await;
        }
    }

    async fn evaluate_node_thresholds(&self, rule: &AlertRule, node_id: &str) {
        let metrics = match self.persistence.latest_node_metrics(node_id).await {
            Ok(Some(metrics)) => metrics,
            _ => return,
        };

        let memory_pct = percent_of(metrics.memory_usage_mb, metrics.memory_total_mb);
        let disk_pct = percent_of(metrics.disk_usage_mb, metrics.disk_total_mb);

        let breach = rule.conditions.cpu_threshold.map(|t| metrics.cpu_percent >= t).unwrap_or(false)
            || rule.conditions.memory_threshold.map(|t| memory_pct >= t).unwrap_or(false)
            || rule.conditions.disk_threshold.map(|t| disk_pct >= t).unwrap_or(false);

        if breach {
            let cutoff = self.clock.now() - chrono::Duration::minutes(rule.cooldown_minutes());
            self.raise(
                Some(node_id),
                None,
                AlertRuleType::ResourceThreshold,
                AlertSeverity::Warning,
                format!("Resource threshold exceeded on node {node_id}"),
                format!(
                    "cpu={:.1}% memory={memory_pct:.1}% ({}/{}MB) disk={disk_pct:.1}% ({}/{}MB)",
                    metrics.cpu_percent, metrics.memory_usage_mb, metrics.memory_total_mb,
                    metrics.disk_usage_mb, metrics.disk_total_mb
                ),
                cutoff,
            )
            .await;
        }
    }
}

/// Usage as a percentage of an allocation/total, per spec.md §4.4: 0% when
/// the allocation is zero rather than dividing by zero.
fn percent_of(usage_mb: i64, total_mb: i64) -> f64 {
    if total_mb <= 0 {
        0.0
    } else {
        (usage_mb as f64 / total_mb as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::alert::{AlertActions, AlertConditions};
    use crate::persistence::MemoryPersistence;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedClock(chrono::DateTime<chrono::Utc>);
    impl Clock for FixedClock {
        fn now(&self) -> chrono::DateTime<chrono::Utc> {
            self.0
        }
    }

    struct CountingWebhooks(AtomicUsize);
    #[async_trait]
    impl Webhooks for CountingWebhooks {
        async fn post(&self, _url: &str, _payload: serde_json::Value) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NoopMailer;
    #[async_trait]
    impl Mailer for NoopMailer {
        async fn send(&self, _to: &str, _subject: &str, _body: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct NoopNotifier;
    impl ClientNotifier for NoopNotifier {
        fn notify_user(&self, _user_id: &str, _event: serde_json::Value) {}
    }

    fn rule() -> AlertRule {
        AlertRule {
            id: "rule-1".to_string(),
            user_id: None,
            name: "node offline".to_string(),
            description: None,
            rule_type: AlertRuleType::NodeOffline,
            target: AlertTarget::Global,
            target_id: None,
            conditions: AlertConditions { cooldown_minutes: Some(10), ..Default::default() },
            actions: AlertActions { webhooks: vec!["https://example.com/hook".to_string()], emails: vec![], notify_owner: false },
            enabled: true,
        }
    }

    #[tokio::test]
    async fn second_raise_within_cooldown_is_suppressed() {
        let persistence = Arc::new(MemoryPersistence::new());
        persistence.seed_alert_rule(rule());
        let persistence: Arc<dyn PersistencePort> = persistence;
        let webhooks = Arc::new(CountingWebhooks(AtomicUsize::new(0)));
        let engine = AlertEngine::new(
            persistence,
            webhooks.clone(),
            Arc::new(NoopMailer),
            Arc::new(FixedClock(chrono::Utc::now())),
            Arc::new(NoopNotifier),
            3,
            Duration::from_secs(300),
        );

        let first = engine
            .raise(
                Some("node-1"),
                None,
                AlertRuleType::NodeOffline,
                AlertSeverity::Critical,
                "t".into(),
                "m".into(),
                chrono::DateTime::<chrono::Utc>::MIN_UTC,
            )
            .await;
        assert!(first.is_some());

        let second = engine
            .raise(
                Some("node-1"),
                None,
                AlertRuleType::NodeOffline,
                AlertSeverity::Critical,
                "t".into(),
                "m".into(),
                chrono::DateTime::<chrono::Utc>::MIN_UTC,
            )
            .await;
        assert!(second.is_none());

        assert_eq!(webhooks.0.load(Ordering::SeqCst), 1);
    }
}
