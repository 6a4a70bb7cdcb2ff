//! Session Pool Manager
//!
//! Single-binary service that:
//! 1. Loads the account document into the credential pool
//! 2. Runs the periodic health-check sweep when the document enables it
//! 3. Serves `/health` and `/metrics` on the main listener
//! 4. Serves the admin API on a separate listener

mod admin;
mod config;
mod metrics;
mod notifier;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use session_auth::Minter;
use session_pool::{HealthChecker, JsonFileStore, Pool};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::{AdminState, build_admin_router};
use crate::config::Config;
use crate::notifier::TracingNotifier;

/// Time allowed for in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state for the main listener
#[derive(Clone)]
struct AppState {
    pool: Arc<Pool>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Main router: `/health` and `/metrics` behind a concurrency limit.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting session-pool-manager");

    // Before the pool exists, so its initial gauges are captured
    let prometheus = metrics::install_recorder()?;

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        admin_listen_addr = %config.server.admin_listen_addr,
        data_file = %config.pool.data_file.display(),
        handshake_url = %config.pool.handshake_url,
        "configuration loaded"
    );

    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let minter = Minter::new(
        client,
        config.pool.handshake_url.clone(),
        Duration::from_secs(config.pool.handshake_timeout_secs),
    );

    let store = JsonFileStore::new(config.pool.data_file.clone());
    let document = store.load().await.with_context(|| {
        format!(
            "failed to load account document from {}",
            config.pool.data_file.display()
        )
    })?;

    let pool = Arc::new(Pool::new(
        document,
        config.cooldown.policy(),
        minter,
        Arc::new(store),
        Arc::new(TracingNotifier),
    ));
    let checker = Arc::new(HealthChecker::with_probe_delay(
        pool.clone(),
        Duration::from_secs(config.health_check.probe_delay_secs),
    ));

    let settings = pool.settings().await;
    if settings.health_check_enabled {
        checker
            .start(
                settings.health_check_interval,
                settings.health_check_auto_delete,
            )
            .await;
    } else {
        info!("health check scheduler disabled");
    }

    let app = build_router(
        AppState {
            pool: pool.clone(),
            prometheus,
            started_at: Instant::now(),
        },
        config.server.max_connections,
    );
    let admin_app = build_admin_router(AdminState::new(pool, checker.clone()));

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;
    let admin_listener = TcpListener::bind(config.server.admin_listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.admin_listen_addr))?;
    info!(
        addr = %config.server.listen_addr,
        admin_addr = %config.server.admin_listen_addr,
        "accepting requests"
    );

    let shutdown = CancellationToken::new();
    let main_server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        }
    });
    let admin_server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            axum::serve(admin_listener, admin_app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        }
    });

    shutdown_signal().await;

    // No new sweep may start once the listeners are draining
    checker.stop().await;
    shutdown.cancel();

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        for (name, server) in [("main", main_server), ("admin", admin_server)] {
            match server.await {
                Ok(Ok(())) => info!(listener = name, "listener drained"),
                Ok(Err(e)) => error!(listener = name, error = %e, "server error during shutdown"),
                Err(e) => error!(listener = name, error = %e, "server task panicked"),
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        );
    }

    info!("shutdown complete");
    Ok(())
}

/// Pool health. 200 while any account is available, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut body = state.pool.health().await;
    let status_code = if body["status"] == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    body["uptime_seconds"] = state.started_at.elapsed().as_secs().into();

    (
        status_code,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT.
///
/// A handler that cannot be installed never fires; the other one still can.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
