//! End-to-end scenario tests driving the Gateway, Task Scheduler, and
//! Alert Engine through their public entry points against the in-memory
//! `PersistencePort` fake and a fixed `Clock`, the way the teacher's own
//! test setup swaps a fake store in rather than pointing at a real
//! database. Each test assembles one full scenario rather than a single
//! mechanism in isolation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use catalyst_core::alerts::AlertEngine;
use catalyst_core::domain::alert::{
    AlertActions, AlertConditions, AlertRule, AlertRuleType, AlertTarget,
};
use catalyst_core::domain::metrics::ServerMetrics;
use catalyst_core::domain::server::{RestartPolicy, Server, ServerStatus};
use catalyst_core::gateway::Gateway;
use catalyst_core::persistence::MemoryPersistence;
use catalyst_core::ports::clock::Clock;
use catalyst_core::ports::mailer::Mailer;
use catalyst_core::ports::notifier::ClientNotifier;
use catalyst_core::ports::persistence::PersistencePort;
use catalyst_core::ports::webhooks::Webhooks;

struct FixedClock(chrono::DateTime<chrono::Utc>);
impl Clock for FixedClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.0
    }
}

fn test_server(id: &str, node_id: &str, status: ServerStatus, restart_policy: RestartPolicy) -> Server {
    Server {
        id: id.to_string(),
        uuid: format!("{id}-uuid"),
        owner_id: "owner-1".to_string(),
        node_id: node_id.to_string(),
        template_id: "template-1".to_string(),
        status,
        allocated_memory_mb: 1024,
        allocated_cpu_cores: 1.0,
        allocated_disk_mb: 10_240,
        primary_ip: Some("10.0.0.5".to_string()),
        primary_port: Some(25565),
        port_bindings: serde_json::json!({}),
        network_mode: "bridge".to_string(),
        environment: HashMap::new(),
        restart_policy,
        crash_count: 0,
        max_crash_count: 3,
        last_crash_at: None,
        suspended_at: None,
        suspension_reason: None,
        container_id: None,
        container_name: None,
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition did not become true in time");
}

/// S3: a server crashes, the Gateway applies the transition, increments
/// the crash count, and — since the server's restart policy allows it and
/// its crash count is under the limit — auto-dispatches a `start_server`
/// command to the node after the configured delay.
#[tokio::test]
async fn crash_triggers_auto_restart_after_delay() {
    let persistence = Arc::new(MemoryPersistence::new());
    persistence.seed_server(test_server("server-1", "node-1", ServerStatus::Running, RestartPolicy::Always));
    let persistence: Arc<dyn PersistencePort> = persistence;

    let gateway = Gateway::new(
        persistence.clone(),
        Arc::new(FixedClock(chrono::Utc::now())),
        Duration::from_secs(60),
        Duration::from_millis(20),
    );

    let (tx, mut rx) = mpsc::channel::<serde_json::Value>(8);
    gateway.registry.admit_agent("node-1".to_string(), tx, chrono::Utc::now());

    gateway
        .handle_agent_frame(
            "node-1",
            serde_json::json!({
                "type": "server_state_update",
                "serverId": "server-1",
                "state": "CRASHED",
            }),
        )
        .await;

    let crashed = persistence.find_server_by_id("server-1").await.unwrap().unwrap();
    assert_eq!(crashed.status, ServerStatus::Crashed);
    assert_eq!(crashed.crash_count, 1);
    assert!(crashed.last_crash_at.is_some());

    let restart_command = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("auto-restart command did not arrive before the timeout")
        .expect("agent channel closed without a command");
    assert_eq!(restart_command["type"], "start_server");
    assert_eq!(restart_command["serverId"], "server-1");
}

/// S3 (boundary): a server that already exhausted its `maxCrashCount`
/// crashes again and is NOT auto-restarted.
#[tokio::test]
async fn crash_past_max_count_is_not_restarted() {
    let persistence = Arc::new(MemoryPersistence::new());
    let mut server = test_server("server-1", "node-1", ServerStatus::Running, RestartPolicy::Always);
    server.crash_count = 3;
    server.max_crash_count = 3;
    persistence.seed_server(server);
    let persistence: Arc<dyn PersistencePort> = persistence;

    let gateway = Gateway::new(
        persistence.clone(),
        Arc::new(FixedClock(chrono::Utc::now())),
        Duration::from_secs(60),
        Duration::from_millis(10),
    );

    let (tx, mut rx) = mpsc::channel::<serde_json::Value>(8);
    gateway.registry.admit_agent("node-1".to_string(), tx, chrono::Utc::now());

    gateway
        .handle_agent_frame(
            "node-1",
            serde_json::json!({"type": "server_state_update", "serverId": "server-1", "state": "CRASHED"}),
        )
        .await;

    let result = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(result.is_err(), "must not auto-restart once maxCrashCount is reached");
}

/// S4: an agent reports a transition the state machine doesn't allow
/// (STOPPED -> RUNNING). The Gateway trusts the report (applies it
/// regardless) but records an audit log line flagging it as illegal.
#[tokio::test]
async fn illegal_transition_is_applied_and_logged() {
    let memory = Arc::new(MemoryPersistence::new());
    memory.seed_server(test_server("server-1", "node-1", ServerStatus::Stopped, RestartPolicy::Never));
    let persistence: Arc<dyn PersistencePort> = memory.clone();

    let gateway = Gateway::new(
        persistence.clone(),
        Arc::new(FixedClock(chrono::Utc::now())),
        Duration::from_secs(60),
        Duration::from_secs(60),
    );

    gateway
        .handle_agent_frame(
            "node-1",
            serde_json::json!({"type": "server_state_update", "serverId": "server-1", "state": "RUNNING"}),
        )
        .await;

    let server = persistence.find_server_by_id("server-1").await.unwrap().unwrap();
    assert_eq!(server.status, ServerStatus::Running, "the agent's report is applied regardless of legality");

    let logs = memory.logs_for_server("server-1");
    assert!(
        logs.iter().any(|l| l.data.contains("cannot transition")),
        "expected an illegal-transition audit line, got: {logs:?}"
    );
}

struct RecordingNotifier;
impl ClientNotifier for RecordingNotifier {
    fn notify_user(&self, _user_id: &str, _event: serde_json::Value) {}
}

struct NoopMailer;
#[async_trait]
impl Mailer for NoopMailer {
    async fn send(&self, _to: &str, _subject: &str, _body: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Fails its first `fail_first_n` calls, then succeeds — simulates a
/// webhook endpoint that 500s once before recovering.
struct FlakyWebhooks {
    fail_first_n: usize,
    attempts: AtomicUsize,
    successes: AtomicUsize,
}

#[async_trait]
impl Webhooks for FlakyWebhooks {
    async fn post(&self, _url: &str, _payload: serde_json::Value) -> anyhow::Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first_n {
            anyhow::bail!("simulated 500 from webhook endpoint");
        }
        self.successes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// S6: a resource-threshold breach raises an alert and dispatches a
/// webhook delivery; the first delivery attempt fails (simulated 500) and
/// is retried to success on a later evaluate pass, while the alert itself
/// is never duplicated across passes (dedup holds for the cooldown).
#[tokio::test]
async fn alert_dedupes_and_retries_delivery_to_success() {
    let memory = Arc::new(MemoryPersistence::new());
    memory.seed_server(test_server("server-1", "node-1", ServerStatus::Running, RestartPolicy::Never));
    memory.seed_alert_rule(AlertRule {
        id: "rule-1".to_string(),
        user_id: None,
        name: "memory pressure".to_string(),
        description: None,
        rule_type: AlertRuleType::ResourceThreshold,
        target: AlertTarget::Server,
        target_id: Some("server-1".to_string()),
        conditions: AlertConditions {
            memory_threshold: Some(90.0),
            cooldown_minutes: Some(10),
            ..Default::default()
        },
        actions: AlertActions {
            webhooks: vec!["https://example.com/hook".to_string()],
            emails: vec![],
            notify_owner: false,
        },
        enabled: true,
    });
    let now = chrono::Utc::now();
    memory
        .append_server_metrics(ServerMetrics {
            server_id: "server-1".to_string(),
            ts: now,
            cpu_percent: 10.0,
            memory_usage_mb: 950, // 950/1024 allocated = ~92.8%, breaches the 90% threshold
            disk_usage_mb: 100,
            disk_io_mb: 0,
            network_rx_bytes: 0,
            network_tx_bytes: 0,
        })
        .await
        .unwrap();
    let persistence: Arc<dyn PersistencePort> = memory.clone();

    let webhooks = Arc::new(FlakyWebhooks {
        fail_first_n: 1,
        attempts: AtomicUsize::new(0),
        successes: AtomicUsize::new(0),
    });

    let engine = AlertEngine::new(
        persistence.clone(),
        webhooks.clone(),
        Arc::new(NoopMailer),
        Arc::new(FixedClock(now)),
        Arc::new(RecordingNotifier),
        5,
        Duration::from_millis(10),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(engine.run(Duration::from_millis(15), shutdown_rx));

    // First passes: alert raised once, first delivery attempt fails.
    wait_until(|| !memory.all_alerts().is_empty()).await;
    wait_until(|| {
        memory
            .all_deliveries()
            .iter()
            .any(|d| d.status == catalyst_core::domain::alert::DeliveryStatus::Failed)
    })
    .await;

    // Several more evaluate passes go by (still within the cooldown
    // window) — the alert must not be duplicated.
    tokio::time::sleep(Duration::from_millis(80)).await;
    let alerts = memory.all_alerts();
    assert_eq!(alerts.len(), 1, "a breach that persists within the cooldown must not raise a second alert");

    // The retry backoff (10ms) has long since elapsed across those
    // passes, so the failed delivery should have been retried to success.
    wait_until(|| {
        memory
            .all_deliveries()
            .iter()
            .any(|d| d.status == catalyst_core::domain::alert::DeliveryStatus::Sent)
    })
    .await;

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(1), engine_task).await;

    assert!(webhooks.successes.load(Ordering::SeqCst) >= 1);
}
