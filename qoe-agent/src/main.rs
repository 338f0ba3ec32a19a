//! QoE Agent - measures network quality and alerts on poor QoE
//!
//! Usage: `qoe-agent [--once]`. With `--once` a single report cycle runs and
//! the summary is printed; otherwise the agent reports every interval until
//! interrupted.

use anyhow::{Context, Result};
use qoe_agent::{Agent, AgentConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("qoe_agent=info,qoe_offline_worker=info")),
        )
        .init();

    info!("QoE Agent v{} starting...", env!("CARGO_PKG_VERSION"));

    let first_run = AgentConfig::is_first_time_setup();
    let config = AgentConfig::load()
        .await
        .context("Failed to load agent configuration")?;
    if first_run {
        match config.save().await {
            Ok(()) => info!("wrote default configuration"),
            Err(e) => warn!("could not write default configuration: {}", e),
        }
    }

    let agent = Agent::new(&config)
        .await
        .context("Failed to create agent")?;

    if std::env::args().any(|arg| arg == "--once") {
        let report = agent
            .report_loop()
            .run_cycle()
            .await
            .context("Report cycle failed")?;
        info!("alert: {:?}", report.alert);
        return Ok(());
    }

    tokio::select! {
        _ = agent.run() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("shutting down");
        }
    }
    Ok(())
}
