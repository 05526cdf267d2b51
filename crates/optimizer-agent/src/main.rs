//! Optimizer agent
//!
//! Runs the adaptive processing optimizer on a host and exposes its health,
//! metrics and reports over HTTP.

mod api;
mod config;

use anyhow::Result;
use optimizer_lib::Optimizer;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = config::AgentConfig::load()?;

    info!(
        node_name = %config.node_name,
        api_port = config.api_port,
        max_capacity = config.optimizer.max_capacity,
        "Starting optimizer agent"
    );

    let optimizer = Optimizer::new(config.optimizer.clone())?;
    optimizer.start().await;

    let state = Arc::new(api::AppState::new(optimizer.clone()));
    let api_port = config.api_port;
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, state).await {
            error!(error = %e, "API server error");
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = api_handle => {
            error!("API server exited unexpectedly");
        }
    }

    optimizer.stop().await;
    info!("Agent stopped");
    Ok(())
}
