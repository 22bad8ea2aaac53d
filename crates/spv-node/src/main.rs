//! # SPV Node
//!
//! Follows the strongest proof-of-work header chain reported by one
//! Electrum server.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (defaults, then `SPV_*` environment variables)
//! 2. Validate configuration
//! 3. Connect to the Electrum server
//! 4. Start the node (store, genesis, subscriptions, catch-up)
//! 5. Run until Ctrl+C, then shut down gracefully

use std::sync::Arc;

use anyhow::{Context, Result};
use header_sync::ElectrumClient;
use spv_node::{NodeConfig, SpvNode};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load configuration
    let config = NodeConfig::from_env();
    config.validate().context("Invalid configuration")?;

    info!("Connecting to Electrum server at {}", config.electrum_addr);
    let client = ElectrumClient::connect(config.electrum_addr.as_str(), &config.sync)
        .await
        .with_context(|| format!("Failed to connect to {}", config.electrum_addr))?;

    let node = SpvNode::start(config, Arc::new(client)).await?;

    // Keep the node running
    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    // Graceful shutdown
    node.shutdown().await;

    Ok(())
}
