use std::net::SocketAddr;

use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use catalyst_core::{config, http, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "catalyst_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if dotenvy::dotenv().is_err() {
        tracing::warn!("no .env file found; relying on process environment");
    }

    let config = config::Config::from_env().map_err(|err| {
        tracing::error!(%err, "invalid configuration, aborting startup");
        anyhow::anyhow!(err)
    })?;
    let port = config.port;

    let app_state = AppState::new(config).await?;

    // Background loops: heartbeat sweep (Gateway), reconciliation (Task
    // Scheduler), evaluate+retry (Alert Engine). All three select on the
    // same `shutdown` watch channel and return after their current
    // iteration once it flips to `true` (spec.md §5).
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let heartbeat_task = tokio::spawn(
        app_state
            .gateway
            .clone()
            .run_heartbeat_sweep(app_state.config.heartbeat_sweep_interval, shutdown_rx.clone()),
    );
    let scheduler_task = tokio::spawn(
        app_state
            .scheduler
            .clone()
            .run(app_state.config.task_reconcile_interval, shutdown_rx.clone()),
    );
    let alerts_task = tokio::spawn(
        app_state
            .alerts
            .clone()
            .run(app_state.config.alert_evaluate_interval, shutdown_rx.clone()),
    );

    let app = http::router(app_state.clone()).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    tracing::info!(%addr, "catalyst core listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received, stopping background loops");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = tokio::join!(heartbeat_task, scheduler_task, alerts_task);

    Ok(())
}
