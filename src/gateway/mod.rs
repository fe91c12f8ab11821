//! The Gateway: the single component holding live WebSocket connections
//! and translating wire messages into domain/persistence operations.
//! Shape mirrors the teacher's `AppState` + `routes/ws.rs` + `main.rs`'s
//! heartbeat-broadcast loop, generalized behind ports instead of an
//! ambient global (spec.md §9's "inject rather than globalize" flag).

pub mod admission;
pub mod correlator;
pub mod fanout;
pub mod registry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::domain::server::RestartPolicy;
use crate::domain::state_machine;
use crate::domain::{Server, ServerLog, ServerStatus};
use crate::error::WireErrorCode;
use crate::ports::agent_sender::AgentSender;
use crate::ports::clock::Clock;
use crate::ports::notifier::ClientNotifier;
use crate::ports::persistence::PersistencePort;
use crate::wire::agent::{AgentMessage, InboundAgentFrame, StartServerCommand};
use crate::wire::client::{ClientMessage, ErrorEvent, ServerControlAction};

use self::correlator::{BinaryChunk, CorrelationError, RequestCorrelator};
use self::registry::ConnectionRegistry;

/// Sends commands to a node over its live WebSocket connection. The
/// concrete `AgentSender` implementation for the Task Scheduler and
/// Alert Engine, which never touch `ConnectionRegistry` directly.
pub struct GatewayAgentSender {
    registry: Arc<ConnectionRegistry>,
}

#[async_trait]
impl AgentSender for GatewayAgentSender {
    async fn send_to_node(&self, node_id: &str, message: serde_json::Value) -> anyhow::Result<()> {
        if self.registry.send_to_agent(node_id, message) {
            Ok(())
        } else {
            Err(anyhow::anyhow!("node {node_id} is not connected"))
        }
    }

    fn is_node_online(&self, node_id: &str) -> bool {
        self.registry.is_agent_online(node_id)
    }
}

/// Per-server critical section, per spec.md §5: state mutations for a
/// given server id are serialized through this shard so two concurrent
/// transitions can never race.
pub struct ServerLocks {
    shards: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl ServerLocks {
    fn new() -> Self {
        Self { shards: DashMap::new() }
    }

    pub async fn lock(&self, server_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let mutex = self
            .shards
            .entry(server_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        mutex.lock_owned().await
    }
}

/// Pushes alert/event notifications to a user's live client sessions.
/// The `AlertEngine`'s concrete [`ClientNotifier`] implementation.
pub struct GatewayClientNotifier {
    registry: Arc<ConnectionRegistry>,
}

impl ClientNotifier for GatewayClientNotifier {
    fn notify_user(&self, user_id: &str, event: serde_json::Value) {
        fanout::fanout_to_user(&self.registry, user_id, event);
    }
}

pub struct Gateway {
    pub registry: Arc<ConnectionRegistry>,
    pub correlator: Arc<RequestCorrelator>,
    pub persistence: Arc<dyn PersistencePort>,
    pub clock: Arc<dyn Clock>,
    pub locks: ServerLocks,
    pub agent_heartbeat_timeout: Duration,
    pub crash_restart_delay: Duration,
}

impl Gateway {
    pub fn new(
        persistence: Arc<dyn PersistencePort>,
        clock: Arc<dyn Clock>,
        agent_heartbeat_timeout: Duration,
        crash_restart_delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: ConnectionRegistry::new(),
            correlator: RequestCorrelator::new(),
            persistence,
            clock,
            locks: ServerLocks::new(),
            agent_heartbeat_timeout,
            crash_restart_delay,
        })
    }

    pub fn agent_sender(&self) -> Arc<dyn AgentSender> {
        Arc::new(GatewayAgentSender {
            registry: self.registry.clone(),
        })
    }

    pub fn client_notifier(&self) -> Arc<dyn ClientNotifier> {
        Arc::new(GatewayClientNotifier {
            registry: self.registry.clone(),
        })
    }

    /// `requestJSON(nodeId, message, timeout) -> reply` (spec.md §4.1): sends
    /// `message` (with a freshly generated `requestId` attached) to the
    /// node's live connection and awaits the correlated `*_response` frame.
    pub async fn request_json(
        &self,
        node_id: &str,
        mut message: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, CorrelationError> {
        let (request_id, fut) = self.correlator.begin(node_id, timeout);
        if let Some(obj) = message.as_object_mut() {
            obj.insert("requestId".to_string(), serde_json::Value::String(request_id.clone()));
        }
        if !self.registry.send_to_agent(node_id, message) {
            self.correlator.resolve(&request_id, serde_json::Value::Null);
            return Err(CorrelationError::Dropped);
        }
        fut.await
    }

    /// `requestBinary(nodeId, message, timeout, onChunk) -> ()` (spec.md
    /// §4.1): same correlation as [`Self::request_json`], but the agent
    /// streams `*_chunk` frames back instead of one `*_response`.
    pub async fn request_binary<F>(
        &self,
        node_id: &str,
        mut message: serde_json::Value,
        timeout: Duration,
        on_chunk: F,
    ) -> Result<(), CorrelationError>
    where
        F: FnMut(String),
    {
        let (request_id, rx) = self.correlator.begin_binary(node_id, 64);
        if let Some(obj) = message.as_object_mut() {
            obj.insert("requestId".to_string(), serde_json::Value::String(request_id.clone()));
        }
        if !self.registry.send_to_agent(node_id, message) {
            return Err(CorrelationError::Dropped);
        }
        self.correlator.drive_binary(&request_id, rx, timeout, on_chunk).await
    }

    /// One WebSocket text/binary frame from a connected agent.
    pub async fn handle_agent_frame(self: &Arc<Self>, node_id: &str, raw: serde_json::Value) {
        let frame = match InboundAgentFrame::parse(raw) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%node_id, error = %err, "rejected malformed agent frame");
                return;
            }
        };

        match frame {
            InboundAgentFrame::Response(resp) => {
                self.correlator.resolve(
                    &resp.request_id,
                    serde_json::json!({"success": resp.success, "data": resp.data}),
                );
            }
            InboundAgentFrame::Chunk(chunk) => {
                let event = if let Some(err) = chunk.error {
                    BinaryChunk::Error(err)
                } else if chunk.done {
                    BinaryChunk::Done
                } else {
                    BinaryChunk::Data(chunk.data.unwrap_or_default())
                };
                self.correlator.resolve_chunk(&chunk.request_id, event);
            }
            InboundAgentFrame::Message(AgentMessage::Heartbeat) => {
                let now = self.clock.now();
                self.registry.touch_agent_heartbeat(node_id, now);
                let _ = self.persistence.touch_node_last_seen(node_id, now).await;
            }
            InboundAgentFrame::Message(AgentMessage::ServerStateUpdate(update)) => {
                self.apply_server_state_update(&update.server_id, update.state, update.reason, update.container_id, update.container_name).await;
            }
            InboundAgentFrame::Message(AgentMessage::ConsoleOutput(out)) => {
                let _ = self
                    .persistence
                    .append_server_log(ServerLog {
                        server_id: out.server_id.clone(),
                        stream: out.stream,
                        data: out.data.clone(),
                        ts: self.clock.now(),
                    })
                    .await;
                self.fanout_console_output(&out.server_id, out.stream, out.data).await;
            }
            InboundAgentFrame::Message(AgentMessage::ResourceStats(stats)) => {
                match self.persistence.find_server_by_uuid_or_id(&stats.server_id).await {
                    Ok(Some(server)) => {
                        let _ = self
                            .persistence
                            .append_server_metrics(crate::domain::metrics::ServerMetrics {
                                server_id: server.id.clone(),
                                ts: self.clock.now(),
                                cpu_percent: stats.cpu_percent,
                                memory_usage_mb: stats.memory_usage_mb,
                                disk_usage_mb: stats.disk_usage_mb,
                                disk_io_mb: stats.disk_io_mb,
                                network_rx_bytes: stats.network_rx_bytes,
                                network_tx_bytes: stats.network_tx_bytes,
                            })
                            .await;
                        let event = serde_json::to_value(crate::wire::client::ResourceStatsEvent {
                            server_id: server.id.clone(),
                            cpu_percent: stats.cpu_percent,
                            memory_usage_mb: stats.memory_usage_mb,
                            disk_usage_mb: stats.disk_usage_mb,
                        })
                        .unwrap();
                        fanout::fanout_server_event(&self.registry, &self.persistence, &server, event).await;
                    }
                    _ => warn!(server_id = %stats.server_id, "resource_stats for unknown server; dropping"),
                }
            }
            InboundAgentFrame::Message(AgentMessage::HealthReport(report)) => {
                let _ = self
                    .persistence
                    .append_node_metrics(crate::domain::metrics::NodeMetrics {
                        node_id: node_id.to_string(),
                        ts: self.clock.now(),
                        cpu_percent: report.cpu_percent,
                        memory_usage_mb: report.memory_usage_mb,
                        memory_total_mb: report.memory_total_mb,
                        disk_usage_mb: report.disk_usage_mb,
                        disk_total_mb: report.disk_total_mb,
                        network_rx_bytes: report.network_rx_bytes,
                        network_tx_bytes: report.network_tx_bytes,
                        container_count: report.container_count,
                    })
                    .await;
            }
            InboundAgentFrame::Message(AgentMessage::BackupComplete(done)) => {
                let backup_name = done.backup_name.clone();
                let server = match self.persistence.find_server_by_uuid_or_id(&done.server_id).await {
                    Ok(Some(server)) => server,
                    _ => {
                        warn!(server_id = %done.server_id, "backup_complete for unknown server; dropping");
                        return;
                    }
                };

                // Upsert by id if the agent assigned one; otherwise by
                // (serverId, name) so a recurring backup with no agent id
                // updates its existing row instead of multiplying rows.
                let backup_id = match done.backup_id.clone() {
                    Some(id) => id,
                    None => match self
                        .persistence
                        .find_backup_by_server_and_name(&server.id, &backup_name)
                        .await
                    {
                        Ok(Some(existing)) => existing.id,
                        _ => uuid::Uuid::new_v4().to_string(),
                    },
                };

                let _ = self
                    .persistence
                    .upsert_backup_by_id(crate::domain::Backup {
                        id: backup_id.clone(),
                        server_id: server.id.clone(),
                        name: backup_name.clone(),
                        path: done.backup_path,
                        size_mb: done.size_mb,
                        checksum: done.checksum,
                        storage_mode: crate::domain::backup::StorageMode::Local,
                        metadata: done.metadata,
                        created_at: self.clock.now(),
                        restored_at: None,
                    })
                    .await;

                let _ = self
                    .persistence
                    .append_server_log(ServerLog {
                        server_id: server.id.clone(),
                        stream: crate::domain::log::LogStream::System,
                        data: format!("backup \"{backup_name}\" completed"),
                        ts: self.clock.now(),
                    })
                    .await;
                let event = serde_json::to_value(crate::wire::client::BackupCompleteEvent {
                    server_id: server.id.clone(),
                    backup_id,
                    backup_name,
                })
                .unwrap();
                fanout::fanout_server_event(&self.registry, &self.persistence, &server, event).await;
            }
            InboundAgentFrame::Message(AgentMessage::BackupRestoreComplete(_))
            | InboundAgentFrame::Message(AgentMessage::BackupDeleteComplete(_)) => {
                // No persistent record beyond the backup row itself; the
                // completion is surfaced to clients via fan-out only.
            }
        }
    }

    /// Applies an agent-reported state transition, per spec.md §9's
    /// "trust with audit" resolution: the Gateway never vetoes an agent's
    /// report, but logs a warning when it's not a legal transition.
    async fn apply_server_state_update(
        self: &Arc<Self>,
        server_id: &str,
        proposed: ServerStatus,
        reason: Option<String>,
        container_id: Option<String>,
        container_name: Option<String>,
    ) {
        let _guard = self.locks.lock(server_id).await;

        let server = match self.persistence.find_server_by_uuid_or_id(server_id).await {
            Ok(Some(server)) => server,
            _ => {
                warn!(server_id, "state update for unknown server");
                return;
            }
        };

        let legal = state_machine::transition(server.status, proposed) != state_machine::TransitionResult::Denied;
        let log_line = if legal {
            format!("server transitioned from {:?} to {:?}", server.status, proposed)
        } else {
            warn!(
                server_id,
                from = ?server.status,
                to = ?proposed,
                "agent reported an illegal state transition; applying anyway"
            );
            format!("cannot transition from {:?} to {:?}", server.status, proposed)
        };

        if let Err(err) = self
            .persistence
            .update_server_status(&server.id, proposed, container_id, container_name)
            .await
        {
            warn!(server_id, error = %err, "failed to persist server state update");
            return;
        }

        let _ = self
            .persistence
            .append_server_log(ServerLog {
                server_id: server.id.clone(),
                stream: crate::domain::log::LogStream::System,
                data: log_line,
                ts: self.clock.now(),
            })
            .await;

        if proposed == ServerStatus::Crashed {
            let crash_count = self
                .persistence
                .increment_crash_count(&server.id, self.clock.now())
                .await
                .unwrap_or(server.crash_count + 1);
            self.maybe_schedule_restart(&server, crash_count);
        }

        self.fanout_state_update(&server, proposed, reason).await;
    }

    /// Spec.md §4.2's crash-recovery policy: `never` never restarts,
    /// `always`/`on-failure` restart after `crash_restart_delay` unless
    /// the server has already exhausted `maxCrashCount`.
    fn maybe_schedule_restart(self: &Arc<Self>, server: &Server, crash_count: i32) {
        if server.restart_policy == RestartPolicy::Never {
            return;
        }
        if server.max_crash_count > 0 && crash_count >= server.max_crash_count {
            warn!(
                server_id = %server.id,
                crash_count,
                max_crash_count = server.max_crash_count,
                "not restarting crashed server: max crash count reached"
            );
            return;
        }

        let gateway = self.clone();
        let server = server.clone();
        let delay = self.crash_restart_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !gateway.registry.is_agent_online(&server.node_id) {
                return;
            }
            let command = StartServerCommand {
                request_id: uuid::Uuid::new_v4().to_string(),
                server_id: server.id.clone(),
                template_id: server.template_id.clone(),
                command: None,
                environment: server.environment.clone(),
                allocated_memory_mb: server.allocated_memory_mb,
                allocated_cpu_cores: server.allocated_cpu_cores,
                port_bindings: server.port_bindings.clone(),
                network_mode: server.network_mode.clone(),
            };
            gateway
                .registry
                .send_to_agent(&server.node_id, serde_json::to_value(command).unwrap());
        });
    }

    async fn fanout_console_output(&self, server_id: &str, stream: crate::domain::log::LogStream, data: String) {
        if let Ok(Some(server)) = self.persistence.find_server_by_uuid_or_id(server_id).await {
            let event = serde_json::to_value(crate::wire::client::ConsoleOutputEvent {
                server_id: server.id.clone(),
                stream,
                data,
            })
            .unwrap();
            fanout::fanout_server_event(&self.registry, &self.persistence, &server, event).await;
        }
    }

    async fn fanout_state_update(&self, server: &Server, state: ServerStatus, reason: Option<String>) {
        let event = serde_json::to_value(crate::wire::client::ServerStateUpdateEvent {
            server_id: server.id.clone(),
            state,
            reason,
        })
        .unwrap();
        fanout::fanout_server_event(&self.registry, &self.persistence, server, event).await;
    }

    /// One message from a connected client: authorize, then act. `session_id`
    /// identifies the originating connection so a failure can be replied to
    /// that session alone, rather than fanned out to the whole audience.
    pub async fn handle_client_message(&self, session_id: &str, user_id: &str, message: ClientMessage) {
        match message {
            ClientMessage::ServerControl(ctl) => {
                self.handle_server_control(session_id, user_id, &ctl.server_id, ctl.action).await;
            }
            ClientMessage::ConsoleInput(input) => {
                self.forward_console_input(session_id, user_id, &input.server_id, input.data).await;
            }
        }
    }

    fn reply_error(&self, session_id: &str, code: WireErrorCode, message: impl Into<String>) {
        let event = ErrorEvent {
            code,
            message: message.into(),
            request_id: None,
        };
        self.registry.send_to_client(session_id, serde_json::to_value(event).unwrap());
    }

    async fn authorize(&self, user_id: &str, server: &Server) -> bool {
        if server.owner_id == user_id {
            return true;
        }
        matches!(
            self.persistence.list_access_for_server(&server.id).await,
            Ok(grants) if grants.iter().any(|g| g.user_id == user_id)
        )
    }

    async fn handle_server_control(
        &self,
        session_id: &str,
        user_id: &str,
        server_id: &str,
        action: ServerControlAction,
    ) {
        let server = match self.persistence.find_server_by_uuid_or_id(server_id).await {
            Ok(Some(server)) => server,
            _ => {
                self.reply_error(session_id, WireErrorCode::ServerNotFound, "server not found");
                return;
            }
        };
        if !self.authorize(user_id, &server).await {
            self.reply_error(session_id, WireErrorCode::PermissionDenied, "permission denied");
            return;
        }

        let allowed = match action {
            ServerControlAction::Start => state_machine::can_start(server.status),
            ServerControlAction::Stop => state_machine::can_stop(server.status),
            ServerControlAction::Restart => state_machine::can_restart(server.status),
        };
        if !allowed {
            self.reply_error(
                session_id,
                WireErrorCode::PermissionDenied,
                format!("{:?} is not a legal action from the server's current state", action),
            );
            return;
        }
        if !self.agent_sender().is_node_online(&server.node_id) {
            self.reply_error(session_id, WireErrorCode::NodeOffline, "node offline");
            return;
        }

        match action {
            ServerControlAction::Start | ServerControlAction::Restart => {
                let command = StartServerCommand {
                    request_id: uuid::Uuid::new_v4().to_string(),
                    server_id: server.id.clone(),
                    template_id: server.template_id.clone(),
                    command: None,
                    environment: server.environment.clone(),
                    allocated_memory_mb: server.allocated_memory_mb,
                    allocated_cpu_cores: server.allocated_cpu_cores,
                    port_bindings: server.port_bindings.clone(),
                    network_mode: server.network_mode.clone(),
                };
                self.registry.send_to_agent(&server.node_id, serde_json::to_value(command).unwrap());
            }
            ServerControlAction::Stop => {
                self.registry.send_to_agent(
                    &server.node_id,
                    serde_json::json!({"type": "stop_server", "serverId": server.id}),
                );
            }
        }
    }

    async fn forward_console_input(&self, session_id: &str, user_id: &str, server_id: &str, data: String) {
        let server = match self.persistence.find_server_by_uuid_or_id(server_id).await {
            Ok(Some(server)) => server,
            _ => {
                self.reply_error(session_id, WireErrorCode::ServerNotFound, "server not found");
                return;
            }
        };
        if !self.authorize(user_id, &server).await {
            self.reply_error(session_id, WireErrorCode::PermissionDenied, "permission denied");
            return;
        }
        if !self.agent_sender().is_node_online(&server.node_id) {
            self.reply_error(session_id, WireErrorCode::NodeOffline, "node offline");
            return;
        }
        self.registry.send_to_agent(
            &server.node_id,
            serde_json::json!({"type": "console_input", "serverId": server.id, "data": data}),
        );
    }

    /// Background sweep (spec.md §4.1/§4.2): any **registry entry** whose
    /// last heartbeat is older than the heartbeat timeout is marked
    /// offline and its running servers transitioned to `CRASHED`.
    /// Liveness is judged from the Connection Registry's own
    /// `last_heartbeat`, not the persisted `last_seen_at` — that DB write
    /// is allowed to fail or lag (spec.md §7), so it must never be the
    /// sole signal a live, heartbeating socket gets flagged offline.
    /// Raising the `node_offline` alert itself is the Alert Engine's job
    /// (spec.md §4.4's Evaluate pass), which polls node staleness against
    /// its own, independently configurable `offlineThresholdSec` and goes
    /// through the normal rule/cooldown/action-dispatch path; this sweep
    /// only owns the connection-state and crash-cascade side effects.
    pub async fn sweep_offline_nodes(&self) {
        let now = self.clock.now();
        let stale_node_ids = self.registry.stale_agents(now, self.agent_heartbeat_timeout);

        for node_id in stale_node_ids {
            info!(node_id = %node_id, "marking node offline after missed heartbeats");
            self.registry.remove_agent(&node_id);
            self.correlator.cancel_for_node(&node_id);
            let _ = self.persistence.set_node_online(&node_id, false).await;

            if let Ok(servers) = self.persistence.list_servers_by_node(&node_id).await {
                for server in servers {
                    if matches!(server.status, ServerStatus::Running | ServerStatus::Starting) {
                        let _guard = self.locks.lock(&server.id).await;
                        let _ = self
                            .persistence
                            .update_server_status(&server.id, ServerStatus::Crashed, None, None)
                            .await;
                        self.fanout_state_update(&server, ServerStatus::Crashed, Some("node went offline".to_string())).await;
                    }
                }
            }
        }
    }

    /// Runs [`Self::sweep_offline_nodes`] on `interval` until `shutdown`
    /// reports true, returning after the current iteration completes
    /// (spec.md §5's graceful-shutdown rule). Mirrors the teacher's
    /// `main.rs` heartbeat-broadcast `tokio::spawn` loop.
    pub async fn run_heartbeat_sweep(self: Arc<Self>, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_offline_nodes().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("gateway heartbeat sweep shutting down");
                        return;
                    }
                }
            }
        }
    }
}
