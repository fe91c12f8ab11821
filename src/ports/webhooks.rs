use async_trait::async_trait;
use serde_json::Value;

/// Narrow interface for the Alert Engine's webhook channel. The real
/// implementation (`crate::alerts::webhook::HttpWebhooks`) wraps `reqwest`;
/// tests substitute a recording fake.
#[async_trait]
pub trait Webhooks: Send + Sync {
    async fn post(&self, url: &str, payload: Value) -> anyhow::Result<()>;
}
