//! The thin HTTP surface the core owns directly: `/healthz`, plus the two
//! WebSocket upgrade routes that terminate agent and client connections
//! into the Gateway. Everything else (CRUD, auth, SFTP, the frontend) is
//! the external REST surface spec.md §1 scopes out; this module is where
//! that surface would mount the Gateway's connections.
//!
//! Grounded on the teacher's `routes/ws.rs` (`WebSocketUpgrade` + query-
//! param token check, `axum::extract::ws` split sender/receiver loop),
//! generalized from one shared broadcast socket into two differently-
//! admitted populations per spec.md §4.1.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::gateway::admission::admit_agent;
use crate::gateway::registry::{parse_client_frame, AGENT_CHANNEL_CAPACITY, CLIENT_CHANNEL_CAPACITY};
use crate::state::AppState;
use crate::wire::agent::NodeHandshakeResponse;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/ws/agent", get(agent_ws_upgrade))
        .route("/ws/client", get(client_ws_upgrade))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    time: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        time: chrono::Utc::now().to_rfc3339(),
    })
}

/// Agent connection parameters (spec.md §6): `nodeId` plus the node's
/// bearer `secret`, both carried as query parameters since the agent is a
/// long-lived process, not a browser session with header-friendly auth.
#[derive(Debug, serde::Deserialize)]
struct AgentConnectParams {
    #[serde(rename = "nodeId")]
    node_id: String,
    secret: String,
}

async fn agent_ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<AgentConnectParams>,
) -> impl IntoResponse {
    let node = match state.persistence.find_node(&params.node_id).await {
        Ok(Some(node)) => node,
        _ => {
            warn!(node_id = %params.node_id, "agent admission denied: unknown node");
            return (axum::http::StatusCode::UNAUTHORIZED, "denied").into_response();
        }
    };
    if admit_agent(&node, &params.secret).is_err() {
        warn!(node_id = %params.node_id, "agent admission denied: secret mismatch");
        return (axum::http::StatusCode::UNAUTHORIZED, "denied").into_response();
    }

    ws.on_upgrade(move |socket| handle_agent_socket(socket, state, node.id)).into_response()
}

async fn handle_agent_socket(socket: WebSocket, state: Arc<AppState>, node_id: String) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<serde_json::Value>(AGENT_CHANNEL_CAPACITY);

    let now = state.gateway.clock.now();
    state.gateway.registry.admit_agent(node_id.clone(), tx, now);
    let _ = state.persistence.set_node_online(&node_id, true).await;
    let _ = state.persistence.touch_node_last_seen(&node_id, now).await;
    info!(node_id = %node_id, "agent connected");

    let handshake = NodeHandshakeResponse {
        success: true,
        backend_address: state.config.backend_external_address.clone(),
    };
    let _ = sink.send(Message::Text(serde_json::to_string(&handshake).unwrap())).await;

    let mut outbound = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(Message::Text(message.to_string())).await.is_err() {
                break;
            }
        }
    });

    let gateway = state.gateway.clone();
    let inbound_node_id = node_id.clone();
    let mut inbound = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            if let Message::Text(text) = message {
                match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(value) => gateway.handle_agent_frame(&inbound_node_id, value).await,
                    Err(err) => warn!(node_id = %inbound_node_id, %err, "dropped malformed agent frame"),
                }
            }
        }
    });

    tokio::select! {
        _ = &mut outbound => inbound.abort(),
        _ = &mut inbound => outbound.abort(),
    }

    state.gateway.registry.remove_agent(&node_id);
    state.gateway.correlator.cancel_for_node(&node_id);
    let _ = state.persistence.set_node_online(&node_id, false).await;
    info!(node_id = %node_id, "agent disconnected");
}

#[derive(Debug, serde::Deserialize)]
struct ClientConnectParams {
    token: String,
}

async fn client_ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ClientConnectParams>,
) -> impl IntoResponse {
    match state.authenticator.authenticate(&params.token).await {
        Some(identity) => ws.on_upgrade(move |socket| handle_client_socket(socket, state, identity.user_id)).into_response(),
        None => {
            warn!("client admission denied: bad bearer credential");
            (axum::http::StatusCode::UNAUTHORIZED, "denied").into_response()
        }
    }
}

async fn handle_client_socket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<serde_json::Value>(CLIENT_CHANNEL_CAPACITY);

    let session_id = format!("{user_id}-{}", monotonic_suffix());
    state.gateway.registry.admit_client(session_id.clone(), user_id.clone(), tx);
    info!(session_id = %session_id, user_id = %user_id, "client connected");

    let mut outbound = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(Message::Text(message.to_string())).await.is_err() {
                break;
            }
        }
    });

    let gateway = state.gateway.clone();
    let inbound_session_id = session_id.clone();
    let inbound_user_id = user_id.clone();
    let mut inbound = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            if let Message::Text(text) = message {
                match parse_client_frame(&text) {
                    Ok(parsed) => gateway.handle_client_message(&inbound_session_id, &inbound_user_id, parsed).await,
                    Err(err) => warn!(session_id = %inbound_session_id, %err, "dropped malformed client frame"),
                }
            }
        }
    });

    tokio::select! {
        _ = &mut outbound => inbound.abort(),
        _ = &mut inbound => outbound.abort(),
    }

    state.gateway.registry.remove_client(&session_id);
    info!(session_id = %session_id, "client disconnected");
}

/// Ephemeral session id suffix: spec.md §4.1 specifies `<userId>-<monotonic>`;
/// a per-process atomic counter satisfies "monotonic" without a clock
/// dependency that could collide at sub-millisecond connect rates.
fn monotonic_suffix() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
