//! Connection bookkeeping for both WebSocket populations. Generalizes the
//! teacher's single `DashMap<String, EngineAgent>` registry (`state.rs`)
//! into two maps — one per population — since agents and clients are
//! admitted differently and fan-out needs to reach only one side.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::wire::client::ClientMessage;

/// Bound chosen so a slow client can fall behind without blocking the
/// Gateway; spec.md's backpressure rule says a full queue drops the new
/// message rather than the connection.
pub const CLIENT_CHANNEL_CAPACITY: usize = 256;
pub const AGENT_CHANNEL_CAPACITY: usize = 256;

pub struct AgentConnection {
    pub node_id: String,
    pub sender: mpsc::Sender<serde_json::Value>,
    /// Updated on every inbound `heartbeat` frame, independent of the
    /// best-effort, allowed-to-fail `last_seen_at` persistence write —
    /// liveness supervision reads this, not the database.
    last_heartbeat: Mutex<DateTime<Utc>>,
}

pub struct ClientConnection {
    pub session_id: String,
    pub user_id: String,
    pub sender: mpsc::Sender<serde_json::Value>,
}

/// Live connection state. Cheap to clone (an `Arc` inside), shared across
/// the HTTP layer, the Gateway's own background loops, and the Task
/// Scheduler / Alert Engine (as `Arc<dyn AgentSender>`, see
/// `crate::gateway::mod::GatewayAgentSender`).
#[derive(Default)]
pub struct ConnectionRegistry {
    agents: DashMap<String, AgentConnection>,
    clients: DashMap<String, ClientConnection>,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn admit_agent(&self, node_id: String, sender: mpsc::Sender<serde_json::Value>, now: DateTime<Utc>) {
        self.agents.insert(
            node_id.clone(),
            AgentConnection { node_id, sender, last_heartbeat: Mutex::new(now) },
        );
    }

    pub fn remove_agent(&self, node_id: &str) {
        self.agents.remove(node_id);
    }

    pub fn is_agent_online(&self, node_id: &str) -> bool {
        self.agents.contains_key(node_id)
    }

    /// Best-effort send. Drops silently on a full or closed channel —
    /// the agent is never torn down just because it fell behind.
    pub fn send_to_agent(&self, node_id: &str, message: serde_json::Value) -> bool {
        match self.agents.get(node_id) {
            Some(conn) => conn.sender.try_send(message).is_ok(),
            None => false,
        }
    }

    /// Records a heartbeat frame's arrival time for `node_id`. No-op if
    /// the node isn't (or is no longer) connected.
    pub fn touch_agent_heartbeat(&self, node_id: &str, now: DateTime<Utc>) {
        if let Some(conn) = self.agents.get(node_id) {
            *conn.last_heartbeat.lock().unwrap() = now;
        }
    }

    /// Node ids whose last recorded heartbeat is older than `timeout` as
    /// of `now` — the registry-scoped liveness check of spec.md §4.1's
    /// heartbeat-supervision rule.
    pub fn stale_agents(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<String> {
        self.agents
            .iter()
            .filter(|kv| {
                let last_heartbeat = *kv.value().last_heartbeat.lock().unwrap();
                now.signed_duration_since(last_heartbeat).to_std().unwrap_or_default() > timeout
            })
            .map(|kv| kv.key().clone())
            .collect()
    }

    pub fn admit_client(&self, session_id: String, user_id: String, sender: mpsc::Sender<serde_json::Value>) {
        self.clients.insert(
            session_id.clone(),
            ClientConnection { session_id, user_id, sender },
        );
    }

    pub fn remove_client(&self, session_id: &str) {
        self.clients.remove(session_id);
    }

    /// Spec's backpressure rule for clients: a full outbound queue drops
    /// the connection rather than the message. Dropping the registry's
    /// `Sender` closes the channel the connection's outbound task reads
    /// from, which tears down the socket; the client is expected to
    /// reconnect.
    pub fn send_to_client(&self, session_id: &str, message: serde_json::Value) -> bool {
        let full = match self.clients.get(session_id) {
            Some(conn) => match conn.sender.try_send(message) {
                Ok(()) => return true,
                Err(mpsc::error::TrySendError::Full(_)) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
            None => return false,
        };
        if full {
            self.remove_client(session_id);
        }
        false
    }

    /// All session ids belonging to a given user. Used by fan-out to
    /// reach every open tab/connection for an authorized viewer.
    pub fn client_sessions_for_user(&self, user_id: &str) -> Vec<String> {
        self.clients
            .iter()
            .filter(|kv| kv.value().user_id == user_id)
            .map(|kv| kv.key().clone())
            .collect()
    }

    pub fn connected_node_ids(&self) -> Vec<String> {
        self.agents.iter().map(|kv| kv.key().clone()).collect()
    }
}

/// Parses a raw text frame from a client connection into a [`ClientMessage`],
/// used by the WebSocket route handler before routing.
pub fn parse_client_frame(raw: &str) -> Result<ClientMessage, crate::wire::client::ClientFrameError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|_| {
        crate::wire::client::ClientFrameError::UnknownType("<invalid json>".to_string())
    })?;
    ClientMessage::parse(value)
}
