//! Structured logging setup.
//!
//! One global `tracing-subscriber` registry: an `EnvFilter` (`RUST_LOG`
//! first, then the configured level) plus at most one fmt layer chosen by
//! [`LogFormat`]. JSON lines carry `timestamp`, `level`, `target`, file and
//! line, and the event's own fields (`msg_id`, `kind`, `block_height`, ...).

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{LogFormat, TelemetryConfig, TelemetryError};

/// Proof that the global subscriber is installed.
#[derive(Debug)]
pub struct StructuredLogger {
    format: LogFormat,
}

impl StructuredLogger {
    pub fn format(&self) -> LogFormat {
        self.format
    }
}

/// Build the filter for `config`.
pub fn env_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TelemetryError::Config(format!("log level '{}': {}", config.log_level, e)))
}

/// Initialize the global subscriber.
///
/// Fails if a global subscriber was already installed.
pub fn init_logging(config: &TelemetryConfig) -> Result<StructuredLogger, TelemetryError> {
    let filter = env_filter(config)?;

    let json = (config.format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
    });
    let pretty = (config.format == LogFormat::Pretty)
        .then(|| fmt::layer().with_target(true).with_ansi(true));

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

    tracing::info!(
        service = %config.full_service_name(),
        format = ?config.format,
        "Structured logging initialized"
    );
    Ok(StructuredLogger {
        format: config.format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_a_config_error() {
        // Only meaningful when RUST_LOG does not override the level.
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = TelemetryConfig {
            log_level: "qc_18=verbose".to_string(),
            ..TelemetryConfig::default()
        };
        assert!(matches!(env_filter(&config), Err(TelemetryError::Config(_))));
    }

    #[test]
    fn test_second_init_fails() {
        let config = TelemetryConfig {
            format: LogFormat::Off,
            ..TelemetryConfig::default()
        };
        // Whichever call loses the race for the global subscriber errors.
        let first = init_logging(&config);
        let second = init_logging(&config);
        assert!(first.is_err() || second.is_err());
    }
}
