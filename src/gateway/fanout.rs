//! Authorized-audience fan-out. Generalizes the teacher's single
//! `broadcast::Sender<LogEntry>` (`state.rs`, `handle_socket`'s
//! `tokio::select!` loop) which reaches every connected client
//! unconditionally — Catalyst has per-server authorization, so fan-out
//! first computes who is allowed to see an event, then sends only to
//! those sessions' bounded per-client channels.

use std::sync::Arc;

use crate::domain::Server;
use crate::gateway::registry::ConnectionRegistry;
use crate::ports::persistence::PersistencePort;

/// Delivers `event` to every client session authorized to view `server`:
/// the owner, plus anyone with a `ServerAccess` row for it. Best-effort —
/// a slow or disconnected client simply doesn't get the message.
pub async fn fanout_server_event(
    registry: &ConnectionRegistry,
    persistence: &Arc<dyn PersistencePort>,
    server: &Server,
    event: serde_json::Value,
) {
    let mut user_ids = vec![server.owner_id.clone()];
    if let Ok(grants) = persistence.list_access_for_server(&server.id).await {
        user_ids.extend(grants.into_iter().map(|a| a.user_id));
    }
    user_ids.sort();
    user_ids.dedup();

    for user_id in user_ids {
        for session_id in registry.client_sessions_for_user(&user_id) {
            registry.send_to_client(&session_id, event.clone());
        }
    }
}

/// Delivers `event` to every session belonging to `user_id` only, used
/// for node-scoped events (no server-level access model applies).
pub fn fanout_to_user(registry: &ConnectionRegistry, user_id: &str, event: serde_json::Value) {
    for session_id in registry.client_sessions_for_user(user_id) {
        registry.send_to_client(&session_id, event.clone());
    }
}
