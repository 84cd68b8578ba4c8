//! # StateLoop Runtime Binary
//!
//! Startup sequence:
//!
//! 1. Initialize structured logging (RUST_LOG controls the filter)
//! 2. Load configuration from the environment
//! 3. Build the core container in dependency order
//! 4. Start the scheduler loop
//! 5. Run until ctrl-c, then stop and flush

use anyhow::{Context, Result};
use loop_runtime::{CoreContainer, RuntimeConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RuntimeConfig::from_env();
    info!(
        backend = ?config.storage.backend,
        path = %config.storage.path.display(),
        "Starting StateLoop runtime"
    );

    let container = CoreContainer::build(config);
    container.scheduler.start();
    info!("StateLoop runtime ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("Shutdown signal received");
    container.shutdown();
    Ok(())
}
