//! Request/response correlation for agent-bound commands that expect a
//! reply (`start_server`, file operations, binary transfers). Generalized
//! from the teacher's single-purpose `oversight_resolvers: DashMap<String,
//! oneshot::Sender<bool>>` (`state.rs`) into a typed correlator supporting
//! both a single-JSON reply and a multi-chunk binary stream, per spec.md
//! §4.1's `requestJSON`/`requestBinary` primitives.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CorrelationError {
    #[error("no reply received before the timeout")]
    TimedOut,
    #[error("the pending request was dropped before a reply arrived")]
    Dropped,
    #[error("the agent reported an error: {0}")]
    AgentError(String),
}

/// One `*_chunk` frame, decoded from the wire shape in spec.md §6.
#[derive(Debug, Clone)]
pub enum BinaryChunk {
    Data(String),
    Done,
    Error(String),
}

enum Pending {
    Json(oneshot::Sender<serde_json::Value>, String),
    Binary(mpsc::Sender<BinaryChunk>, String),
}

impl Pending {
    fn owner(&self) -> &str {
        match self {
            Pending::Json(_, owner) => owner,
            Pending::Binary(_, owner) => owner,
        }
    }
}

/// Tracks in-flight request ids awaiting a `*_response`/`*_chunk` frame
/// from an agent. One instance is shared across all agent connections.
/// Each entry is tagged with the node id that owns it, so a disconnect
/// can cancel every correlation tied to that socket instead of letting
/// them run out the clock on their own timeout (spec.md §5).
pub struct RequestCorrelator {
    pending: DashMap<String, Pending>,
}

impl RequestCorrelator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: DashMap::new(),
        })
    }

    /// Registers a new request id for a single-JSON reply (`requestJSON`)
    /// owned by `node_id`. Returns the id alongside a future that resolves
    /// with the reply, or times out after `timeout`; the entry is always
    /// unregistered before the future resolves, per spec.md §5's
    /// cancellation rule.
    pub fn begin(
        self: &Arc<Self>,
        node_id: &str,
        timeout: Duration,
    ) -> (String, impl std::future::Future<Output = Result<serde_json::Value, CorrelationError>>) {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), Pending::Json(tx, node_id.to_string()));

        let correlator = self.clone();
        let id_for_wait = request_id.clone();
        let fut = async move {
            let result = tokio::time::timeout(timeout, rx).await;
            correlator.pending.remove(&id_for_wait);
            match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(_)) => Err(CorrelationError::Dropped),
                Err(_) => Err(CorrelationError::TimedOut),
            }
        };
        (request_id, fut)
    }

    /// Registers a new request id for a multi-chunk binary reply
    /// (`requestBinary`) owned by `node_id`. Returns the id and the
    /// receiving half of a bounded channel; the caller drains it until a
    /// [`BinaryChunk::Done`] or [`BinaryChunk::Error`], or until `timeout`
    /// elapses between chunks (an intermediate `error` frame aborts the
    /// stream per spec.md §4.1).
    pub fn begin_binary(self: &Arc<Self>, node_id: &str, buffer: usize) -> (String, mpsc::Receiver<BinaryChunk>) {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.pending.insert(request_id.clone(), Pending::Binary(tx, node_id.to_string()));
        (request_id, rx)
    }

    /// Drops every pending correlation owned by `node_id`. Dropping the
    /// reply sender/channel (rather than resolving it) makes the waiting
    /// `request_json`/`request_binary` call fail with
    /// [`CorrelationError::Dropped`] immediately instead of waiting out
    /// its timeout — the disconnect-cancels-correlations rule of spec.md
    /// §5.
    pub fn cancel_for_node(&self, node_id: &str) {
        let ids: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.value().owner() == node_id)
            .map(|entry| entry.key().clone())
            .collect();
        for id in ids {
            self.pending.remove(&id);
        }
    }

    /// Drives a `requestBinary` stream to completion, invoking `on_chunk`
    /// for every `BinaryChunk::Data` in order and stopping at `Done` or
    /// `Error`. Unregisters the pending entry unconditionally.
    pub async fn drive_binary<F>(
        &self,
        request_id: &str,
        mut rx: mpsc::Receiver<BinaryChunk>,
        timeout: Duration,
        mut on_chunk: F,
    ) -> Result<(), CorrelationError>
    where
        F: FnMut(String),
    {
        let result = loop {
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(BinaryChunk::Data(data))) => on_chunk(data),
                Ok(Some(BinaryChunk::Done)) => break Ok(()),
                Ok(Some(BinaryChunk::Error(err))) => break Err(CorrelationError::AgentError(err)),
                Ok(None) => break Err(CorrelationError::Dropped),
                Err(_) => break Err(CorrelationError::TimedOut),
            }
        };
        self.pending.remove(request_id);
        result
    }

    /// Delivers a single-JSON reply to whoever is waiting on `request_id`.
    /// No-op if nobody is waiting (late/duplicate reply, or the waiter
    /// already timed out).
    pub fn resolve(&self, request_id: &str, value: serde_json::Value) {
        if let Some((_, Pending::Json(tx, _))) = self.pending.remove(request_id) {
            let _ = tx.send(value);
        }
    }

    /// Delivers one binary chunk frame to whoever is streaming
    /// `request_id`. The entry stays registered until `drive_binary` sees
    /// `Done`/`Error` and removes it itself — a chunk frame alone must
    /// never unregister the waiter mid-stream.
    pub fn resolve_chunk(&self, request_id: &str, chunk: BinaryChunk) {
        if let Some(entry) = self.pending.get(request_id) {
            if let Pending::Binary(tx, _) = entry.value() {
                let _ = tx.try_send(chunk);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_delivers_to_waiter() {
        let correlator = RequestCorrelator::new();
        let (request_id, fut) = correlator.begin("node-1", Duration::from_secs(5));
        correlator.resolve(&request_id, serde_json::json!({"ok": true}));
        let result = fut.await.unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn unresolved_request_times_out() {
        let correlator = RequestCorrelator::new();
        let (_id, fut) = correlator.begin("node-1", Duration::from_millis(20));
        let result = fut.await;
        assert!(matches!(result, Err(CorrelationError::TimedOut)));
    }

    #[tokio::test]
    async fn disconnect_cancels_pending_correlation_for_that_node() {
        let correlator = RequestCorrelator::new();
        let (_request_id, fut) = correlator.begin("node-1", Duration::from_secs(5));
        let (_other_id, other_fut) = correlator.begin("node-2", Duration::from_secs(5));

        correlator.cancel_for_node("node-1");

        let result = fut.await;
        assert!(matches!(result, Err(CorrelationError::Dropped)));

        // a cancellation for one node must not disturb another node's
        // in-flight correlation
        correlator.resolve(&_other_id, serde_json::json!({"ok": true}));
        assert_eq!(other_fut.await.unwrap(), serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn binary_stream_collects_chunks_in_order() {
        let correlator = RequestCorrelator::new();
        let (request_id, rx) = correlator.begin_binary("node-1", 8);

        correlator.resolve_chunk(&request_id, BinaryChunk::Data("a".to_string()));
        correlator.resolve_chunk(&request_id, BinaryChunk::Data("b".to_string()));
        correlator.resolve_chunk(&request_id, BinaryChunk::Done);

        let mut collected = Vec::new();
        let result = correlator
            .drive_binary(&request_id, rx, Duration::from_secs(1), |chunk| collected.push(chunk))
            .await;

        assert!(result.is_ok());
        assert_eq!(collected, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn binary_stream_error_frame_aborts() {
        let correlator = RequestCorrelator::new();
        let (request_id, rx) = correlator.begin_binary("node-1", 8);
        correlator.resolve_chunk(&request_id, BinaryChunk::Error("disk full".to_string()));

        let result = correlator
            .drive_binary(&request_id, rx, Duration::from_secs(1), |_| {})
            .await;

        assert!(matches!(result, Err(CorrelationError::AgentError(msg)) if msg == "disk full"));
    }
}
