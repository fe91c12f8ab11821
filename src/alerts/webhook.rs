//! Webhook delivery channel. Wraps a single shared `reqwest::Client`, the
//! same pooling pattern the teacher uses for its LLM provider calls
//! (`state.rs`'s `http_client: Arc<Client>` — "one client per process, not
//! per request").

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::ports::webhooks::Webhooks;

pub struct HttpWebhooks {
    client: Arc<Client>,
}

impl HttpWebhooks {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Webhooks for HttpWebhooks {
    async fn post(&self, url: &str, payload: Value) -> anyhow::Result<()> {
        let body = if url.contains("discord.com/api/webhooks") {
            discord_embed(&payload)
        } else {
            payload
        };

        let response = self.client.post(url).json(&body).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("webhook endpoint returned {}", response.status());
        }
        Ok(())
    }
}

/// Discord expects `{"embeds": [...]}` rather than an arbitrary JSON
/// body; reshape a generic alert payload into that envelope when the
/// target URL is a Discord webhook.
fn discord_embed(payload: &Value) -> Value {
    let title = payload.get("title").and_then(Value::as_str).unwrap_or("Catalyst alert");
    let message = payload.get("message").and_then(Value::as_str).unwrap_or("");
    let severity = payload.get("severity").and_then(Value::as_str).unwrap_or("warning");
    let color = if severity == "critical" { 0xE02424 } else { 0xE8A317 };

    serde_json::json!({
        "embeds": [{
            "title": title,
            "description": message,
            "color": color,
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_alerts_render_red() {
        let payload = serde_json::json!({"title": "t", "message": "m", "severity": "critical"});
        let embed = discord_embed(&payload);
        assert_eq!(embed["embeds"][0]["color"], 0xE02424);
    }
}
