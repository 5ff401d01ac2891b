//! # Quantum Telemetry
//!
//! Logging and metrics shared by the node runtime and the reward calculator.
//!
//! - **Logging**: `tracing-subscriber` registry, env filter, pretty or JSON lines
//! - **Metrics**: Prometheus counters, gauges and histograms in one global registry
//!
//! ```rust,ignore
//! use quantum_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _telemetry = init_telemetry(TelemetryConfig::for_subsystem("18", "reward-calc"))?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `QC_SERVICE_NAME` | `quantum-chain` | Service name in logs |
//! | `QC_SUBSYSTEM_ID` | `00` | Subsystem identifier |
//! | `QC_LOG_LEVEL` | `info` | Filter when `RUST_LOG` is unset |
//! | `QC_LOG_FORMAT` | `pretty` | `pretty`, `json` or `off` |
//! | `QC_JSON_LOGS` | container-dependent | Shorthand for `QC_LOG_FORMAT=json` |

mod config;
mod logging;
pub mod metrics;

pub use config::{LogFormat, TelemetryConfig};
pub use logging::{env_filter, init_logging, StructuredLogger};
pub use metrics::{
    encode_metrics, register_metrics, MetricsHandle, RC_BLOCKS_COMMITTED, RC_CALL_DURATION,
    RC_DATA_LOG_FLUSH_DURATION, RC_DATA_LOG_RECORDS, RC_DATA_LOG_ROTATIONS,
    RC_LAST_COMMITTED_HEIGHT, RC_NOTIFICATIONS, RC_PENDING_CALLS, RC_REQUESTS_SENT,
    RC_REQUEST_TIMEOUTS, RC_RESPONSES_RECEIVED, RC_SNAPSHOTS_REMOVED, RC_UNMATCHED_RESPONSES,
    SUBSYSTEM_ERRORS,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Register metrics, then install the log subscriber.
///
/// Hold the returned guard for the lifetime of the process.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = register_metrics()?;
    let logger = init_logging(&config)?;
    Ok(TelemetryGuard {
        service: config.full_service_name(),
        _logger: logger,
        _metrics: metrics,
    })
}

/// Keeps telemetry alive; logs a final metrics dump at debug level on drop.
pub struct TelemetryGuard {
    service: String,
    _logger: StructuredLogger,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        match encode_metrics() {
            Ok(text) => tracing::debug!(service = %self.service, "Final metrics:\n{}", text),
            Err(e) => tracing::warn!("Failed to encode final metrics: {}", e),
        }
        tracing::info!(service = %self.service, "Shutting down telemetry...");
    }
}
