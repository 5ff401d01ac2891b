//! Telemetry configuration from environment variables.

use std::env;
use std::str::FromStr;

/// How log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable, coloured.
    Pretty,
    /// One JSON object per line with file and line.
    Json,
    /// Filter only, no output layer.
    Off,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "off" | "none" => Ok(Self::Off),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Configuration for logging and metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to the startup line
    pub service_name: String,

    /// Subsystem identifier ("18" for reward calculation, "00" for none)
    pub subsystem_id: String,

    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub log_level: String,

    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "quantum-chain".to_string(),
            subsystem_id: "00".to_string(),
            log_level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `QC_SERVICE_NAME`: Service name (default: quantum-chain)
    /// - `QC_SUBSYSTEM_ID`: Subsystem ID (default: 00)
    /// - `QC_LOG_LEVEL`: Filter directive (default: info)
    /// - `QC_LOG_FORMAT`: `pretty`, `json` or `off`
    /// - `QC_JSON_LOGS`: legacy switch for `json`; containers default to JSON
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let in_container =
            env::var_os("KUBERNETES_SERVICE_HOST").is_some() || env::var_os("DOCKER_CONTAINER").is_some();

        let format = match env::var("QC_LOG_FORMAT").ok().and_then(|v| v.parse().ok()) {
            Some(format) => format,
            None => {
                let json = env::var("QC_JSON_LOGS")
                    .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                    .unwrap_or(in_container);
                if json {
                    LogFormat::Json
                } else {
                    defaults.format
                }
            }
        };

        Self {
            service_name: env::var("QC_SERVICE_NAME").unwrap_or(defaults.service_name),
            subsystem_id: env::var("QC_SUBSYSTEM_ID").unwrap_or(defaults.subsystem_id),
            log_level: env::var("QC_LOG_LEVEL").unwrap_or(defaults.log_level),
            format,
        }
    }

    /// Configuration for one subsystem binary, e.g. `("18", "reward-calc")`.
    pub fn for_subsystem(subsystem_id: &str, subsystem_name: &str) -> Self {
        Self {
            subsystem_id: subsystem_id.to_string(),
            service_name: format!("qc-{}-{}", subsystem_id, subsystem_name),
            ..Self::from_env()
        }
    }

    /// Service name, suffixed with the subsystem unless it is already part
    /// of it.
    pub fn full_service_name(&self) -> String {
        let tag = format!("qc-{}-", self.subsystem_id);
        if self.subsystem_id == "00" || self.service_name.starts_with(&tag) {
            self.service_name.clone()
        } else {
            format!("{}-{}", self.service_name, self.subsystem_id)
        }
    }
}
