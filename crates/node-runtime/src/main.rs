//! # Quantum-Chain Node Runtime
//!
//! Starts the external reward calculator and keeps it synchronized with the
//! node's block processing.
//!
//! ## Startup Sequence
//!
//! 1. Initialize telemetry (logging + metrics)
//! 2. Load configuration from the environment
//! 3. Bind the IPC socket, open the data log and metadata store
//! 4. Launch the engine, wait for READY, send INIT
//! 5. Run until Ctrl+C, then shut down gracefully

use anyhow::Result;
use node_runtime::{NodeConfig, NodeRuntime};
use qc_18_reward_calc::ProcessLauncher;
use quantum_telemetry::{init_telemetry, TelemetryConfig};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging and metrics
    let _telemetry = init_telemetry(TelemetryConfig::for_subsystem("18", "reward-calc"))?;

    // Load configuration
    let config = NodeConfig::from_env()?;

    // Create and start the node runtime
    let runtime = NodeRuntime::new(config, Arc::new(ProcessLauncher))?;
    runtime.start().await?;

    // Keep the node running
    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    // Graceful shutdown
    runtime.shutdown().await;

    Ok(())
}
