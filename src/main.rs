use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tracing::{error, info};

use hirelens_monitor::config::MonitorConfig;
use hirelens_monitor::{server, AppState};

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hirelens_monitor=info,tower_http=info".into()),
        )
        .init();

    // ── 1. Load configuration ────────────────────────────────────
    let config = match MonitorConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid monitoring configuration");
            std::process::exit(1);
        }
    };
    let addr = config.bind_addr;
    info!(
        slow_request_secs = config.slow_request_threshold.as_secs_f64(),
        error_history = config.error_history_capacity,
        log_request_bodies = config.log_request_bodies,
        "monitoring configured"
    );

    // ── 2. Build shared state + router ───────────────────────────
    let state = Arc::new(AppState::new(config));
    let app = server::create_router(state, Router::new());

    // ── 3. Bind & serve ──────────────────────────────────────────
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%addr, error = %err, "failed to bind");
            std::process::exit(1);
        }
    };

    info!(%addr, "listening");
    info!("Metrics JSON    → http://{addr}/api/monitoring/metrics");
    info!("Metrics SSE     → http://{addr}/api/monitoring/metrics/stream");

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    if let Err(err) = served {
        error!(error = %err, "server exited with error");
        std::process::exit(1);
    }
    info!("shut down");
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
}
