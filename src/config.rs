//! Centralizes every env var in spec.md §6 into one struct validated at
//! startup. The teacher reads `env::var(...)` ad hoc in `state.rs`/
//! `main.rs`; Catalyst Core has a dozen knobs instead of two, so they're
//! collected and validated together — invalid values are startup-fatal
//! per spec.md §7's "Fatal (startup)" error category.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub agent_heartbeat_timeout: Duration,
    pub heartbeat_sweep_interval: Duration,
    pub task_reconcile_interval: Duration,
    pub alert_evaluate_interval: Duration,
    pub alert_delivery_max_attempts: i32,
    pub alert_delivery_retry_backoff: Duration,
    pub crash_restart_delay: Duration,
    pub suspension_enforced: bool,
    pub backend_external_address: String,
    pub timezone: chrono_tz::Tz,
    pub database_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            port: parse_env("PORT", "3000")?,
            agent_heartbeat_timeout: Duration::from_secs(parse_env(
                "AGENT_HEARTBEAT_TIMEOUT_SEC",
                "90",
            )?),
            heartbeat_sweep_interval: Duration::from_secs(parse_env(
                "HEARTBEAT_SWEEP_INTERVAL_SEC",
                "30",
            )?),
            task_reconcile_interval: Duration::from_secs(parse_env(
                "TASK_RECONCILE_INTERVAL_SEC",
                "60",
            )?),
            alert_evaluate_interval: Duration::from_secs(parse_env(
                "ALERT_EVALUATE_INTERVAL_SEC",
                "30",
            )?),
            alert_delivery_max_attempts: parse_env("ALERT_DELIVERY_MAX_ATTEMPTS", "3")?,
            alert_delivery_retry_backoff: Duration::from_secs(parse_env(
                "ALERT_DELIVERY_RETRY_BACKOFF_SEC",
                "300",
            )?),
            crash_restart_delay: Duration::from_secs(parse_env("CRASH_RESTART_DELAY_SEC", "5")?),
            suspension_enforced: parse_env("SUSPENSION_ENFORCED", "true")?,
            backend_external_address: std::env::var("BACKEND_EXTERNAL_ADDRESS")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            timezone: {
                let raw = std::env::var("TIMEZONE").unwrap_or_else(|_| "UTC".to_string());
                raw.parse::<chrono_tz::Tz>()
                    .map_err(|_| ConfigError::InvalidValue {
                        var: "TIMEZONE",
                        value: raw.clone(),
                        reason: "not a recognized IANA timezone".to_string(),
                    })?
            },
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://catalyst.db".to_string()),
        })
    }
}

fn parse_env<T>(var: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    let raw = std::env::var(var).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>().map_err(|_| ConfigError::InvalidValue {
        var,
        value: raw.clone(),
        reason: "could not parse".to_string(),
    })
}
