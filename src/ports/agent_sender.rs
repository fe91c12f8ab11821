use async_trait::async_trait;
use serde_json::Value;

/// Narrow interface for sending a message to a node's agent connection,
/// breaking the cyclic coupling spec.md §9 calls out between the
/// Scheduler/Alert Engine and the Gateway's live socket table — callers
/// depend on this trait, not on `Gateway` itself.
#[async_trait]
pub trait AgentSender: Send + Sync {
    /// Fire-and-forget: queue `message` for node `node_id`'s agent
    /// connection. Returns `Ok(())` once queued, `Err` if the node has no
    /// live connection (`NODE_OFFLINE`).
    async fn send_to_node(&self, node_id: &str, message: Value) -> anyhow::Result<()>;

    fn is_node_online(&self, node_id: &str) -> bool;
}
