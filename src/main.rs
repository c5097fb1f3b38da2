//! daiv-sandboxd entry point.
//!
//! Initialises tracing, loads configuration from `DAIV_SANDBOX_*` environment
//! variables (falling back to a secrets-directory file for the API key),
//! connects to the local container engine, and starts the HTTP server.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use daiv_sandbox::config::Settings;
use daiv_sandbox::http::build_router;
use daiv_sandbox::http::handlers::AppState;
use daiv_sandbox::infra::bollard_engine::BollardEngine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("daiv-sandboxd starting");

    let config = Settings::load().context("failed to load DAIV_SANDBOX_* config")?;

    tracing::info!(
        host = %config.host,
        port = config.port,
        environment = ?config.environment,
        runtime = ?config.runtime,
        "configuration loaded",
    );

    let runtime = match config.runtime {
        daiv_sandbox::config::Runtime::Runc => None,
        daiv_sandbox::config::Runtime::Runsc => Some("runsc".to_string()),
    };
    let engine = BollardEngine::connect(runtime).context("failed to connect to container engine")?;

    let addr = std::net::SocketAddr::new(config.host, config.port);
    let state = Arc::new(AppState { engine, config });
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await.context("failed to bind TCP listener")?;
    tracing::info!(%addr, "daiv-sandboxd ready");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!("daiv-sandboxd shut down");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) for graceful shutdown.
async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
    tracing::info!("received shutdown signal");
}
