//! pnp-gateway server entry point.
//!
//! Starts the Axum HTTP server with REST and WebSocket endpoints against an
//! in-process simulated machine.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use pnp_gateway::api;
use pnp_gateway::app_state::AppState;
use pnp_gateway::config::{GatewayConfig, LogFormat};
use pnp_gateway::domain::SimulatedMachine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = GatewayConfig::from_env().map_err(|err| anyhow::anyhow!("{err}"))?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::info!(addr = %config.listen_addr, "starting pnp-gateway");

    // Build domain layer
    let machine = Arc::new(SimulatedMachine::new(
        config.sim_camera_width,
        config.sim_camera_height,
    ));

    // Build services and application state
    let listen_addr = config.listen_addr;
    let app_state = AppState::new(machine, config);
    app_state.dispatcher.initialize();

    // Build router
    let app = api::build_app(app_state.clone());

    // Start server
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    tracing::info!(addr = %listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let stopped = app_state.streams.stop_all();
    app_state.dispatcher.teardown();
    tracing::info!(stopped_streams = stopped, "pnp-gateway stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
