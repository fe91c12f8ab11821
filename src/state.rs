//! Process-wide collaborators, constructed once in `main` and shared via
//! `Arc<AppState>` through Axum's `State` extractor. Replaces the
//! teacher's single ambient `AppState` (one `DashMap` registry, one
//! broadcast channel) with the four injected subsystems spec.md §9 asks
//! for — `Gateway`, `TaskScheduler`, `AlertEngine`, plus the shared
//! `PersistencePort`/`ClientAuthenticator` ports they're all built on.

use std::sync::Arc;

use reqwest::Client;

use crate::alerts::mail::SmtpMailer;
use crate::alerts::webhook::HttpWebhooks;
use crate::alerts::AlertEngine;
use crate::config::Config;
use crate::gateway::Gateway;
use crate::ports::auth::{ClientAuthenticator, StaticTokenAuthenticator};
use crate::ports::clock::SystemClock;
use crate::ports::mailer::Mailer;
use crate::ports::persistence::PersistencePort;
use crate::ports::webhooks::Webhooks;
use crate::scheduler::TaskScheduler;

pub struct AppState {
    pub config: Config,
    pub persistence: Arc<dyn PersistencePort>,
    pub gateway: Arc<Gateway>,
    pub scheduler: Arc<TaskScheduler>,
    pub alerts: Arc<AlertEngine>,
    pub authenticator: Arc<dyn ClientAuthenticator>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let persistence: Arc<dyn PersistencePort> =
            Arc::new(crate::persistence::SqlxPersistence::connect(&config.database_url).await?);
        let clock = Arc::new(SystemClock);

        let gateway = Gateway::new(
            persistence.clone(),
            clock.clone(),
            config.agent_heartbeat_timeout,
            config.crash_restart_delay,
        );

        let scheduler = TaskScheduler::new(
            persistence.clone(),
            gateway.agent_sender(),
            clock.clone(),
            config.timezone,
            config.suspension_enforced,
        );

        let http_client = Arc::new(Client::new());
        let webhooks: Arc<dyn Webhooks> = Arc::new(HttpWebhooks::new(http_client));
        let mailer: Arc<dyn Mailer> = match SmtpMailer::from_env() {
            Ok(mailer) => Arc::new(mailer),
            Err(err) => {
                tracing::warn!(%err, "SMTP not configured; alert emails will fail to send");
                Arc::new(UnconfiguredMailer)
            }
        };

        let alerts = AlertEngine::new(
            persistence.clone(),
            webhooks,
            mailer,
            clock,
            gateway.client_notifier(),
            config.alert_delivery_max_attempts,
            config.alert_delivery_retry_backoff,
        );

        let authenticator: Arc<dyn ClientAuthenticator> = Arc::new(StaticTokenAuthenticator::new(
            std::env::var("DEV_CLIENT_TOKEN").unwrap_or_else(|_| "catalyst-dev-token".to_string()),
            std::env::var("DEV_CLIENT_USER_ID").unwrap_or_else(|_| "dev-user".to_string()),
        ));

        Ok(Arc::new(Self {
            config,
            persistence,
            gateway,
            scheduler,
            alerts,
            authenticator,
        }))
    }
}

struct UnconfiguredMailer;

#[async_trait::async_trait]
impl Mailer for UnconfiguredMailer {
    async fn send(&self, _to: &str, _subject: &str, _body: &str) -> anyhow::Result<()> {
        anyhow::bail!("SMTP is not configured (set SMTP_HOST/SMTP_FROM)")
    }
}
