//! Typed domain errors (spec.md §7's taxonomy) plus the stable wire error
//! codes exposed to clients, and the RFC-9457 `ProblemDetails` responder
//! kept from the teacher's `routes/error.rs` for the admin HTTP surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("server not found")]
    ServerNotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("node offline")]
    NodeOffline,
    #[error("persistence error: {0}")]
    Persistence(#[from] crate::ports::persistence::PersistenceError),
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

/// Stable error codes exposed to clients over the wire (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WireErrorCode {
    ServerNotFound,
    PermissionDenied,
    NodeOffline,
}

impl CoreError {
    /// Maps to the stable wire code, if this error is one that's allowed
    /// to be surfaced verbatim to the originating client (spec.md §7's
    /// "Authorization" category). Invariant-violation and persistence
    /// errors are NOT mapped — they're logged at warning/error level and
    /// never propagated to the remote peer.
    pub fn wire_code(&self) -> Option<WireErrorCode> {
        match self {
            CoreError::ServerNotFound => Some(WireErrorCode::ServerNotFound),
            CoreError::PermissionDenied => Some(WireErrorCode::PermissionDenied),
            CoreError::NodeOffline => Some(WireErrorCode::NodeOffline),
            _ => None,
        }
    }
}

/// RFC 9457 (Problem Details for HTTP APIs) compliant error structure,
/// kept verbatim in shape from the teacher's `routes/error.rs`.
#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_url: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl ProblemDetails {
    pub fn new(status: StatusCode, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            type_url: format!("https://httpstatuses.com/{}", status.as_u16()),
            title: title.into(),
            status: status.as_u16(),
            detail: detail.into(),
            instance: None,
        }
    }
}

impl IntoResponse for ProblemDetails {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}
