//! Standalone offline worker
//!
//! Serves the QoE app's assets network-first from its local HTTP front and
//! turns push messages posted to `/push` into desktop notifications.

use anyhow::{Context, Result};
use qoe_offline_worker::WorkerConfig;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("qoe_offline_worker=info")),
        )
        .init();

    info!("QoE offline worker starting...");

    let config = WorkerConfig::load()
        .await
        .context("Failed to load worker configuration")?;
    let worker = qoe_offline_worker::start(config)
        .await
        .context("Failed to start offline worker")?;

    if let Err(e) = worker.handle.ready().await {
        error!("worker did not activate: {}", e);
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutting down");
    worker.shutdown();
    Ok(())
}
