//! Reward calculator configuration.

use crate::ports::outbound::EngineLaunchSpec;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings for the proxy, the engine process and the data log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardCalcConfig {
    /// Unix socket the node listens on and the engine connects to
    pub socket_path: PathBuf,
    /// Per-call response timeout
    pub ipc_timeout: Duration,
    /// Engine executable
    pub engine_binary: PathBuf,
    /// Engine's own database directory
    pub db_dir: PathBuf,
    /// Hint for how many databases the engine shards into
    pub db_count: u32,
    /// Root holding `current_db` and sealed snapshots
    pub data_root: PathBuf,
    /// Engine log file
    pub log_path: PathBuf,
    /// Start the engine with its monitor enabled
    pub monitor: bool,
    /// Bound of each submission lane
    pub lane_capacity: usize,
    /// Blocks between two calculations
    pub calculation_period: u64,
    /// Version written into each log header
    pub header_version: u32,
}

impl Default for RewardCalcConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/qc-rc.sock"),
            ipc_timeout: Duration::from_secs(5),
            engine_binary: PathBuf::from("icon_rc"),
            db_dir: PathBuf::from("./data/rc"),
            db_count: 16,
            data_root: PathBuf::from("./data/iiss"),
            log_path: PathBuf::from("./data/rc.log"),
            monitor: false,
            lane_capacity: 64,
            calculation_period: 43_200, // one day of 2-second blocks
            header_version: 2,
        }
    }
}

impl RewardCalcConfig {
    /// Everything under `dir`, short timeout and period.
    pub fn for_testing(dir: &Path) -> Self {
        Self {
            socket_path: dir.join("rc.sock"),
            ipc_timeout: Duration::from_secs(2),
            engine_binary: PathBuf::from("mock-engine"),
            db_dir: dir.join("rc"),
            db_count: 1,
            data_root: dir.join("iiss"),
            log_path: dir.join("rc.log"),
            monitor: false,
            lane_capacity: 16,
            calculation_period: 10,
            header_version: 2,
        }
    }

    /// Read `QC_RC_*` variables, falling back to [`Default`].
    ///
    /// - `QC_RC_SOCKET_PATH`
    /// - `QC_RC_IPC_TIMEOUT_MS`
    /// - `QC_RC_ENGINE_BINARY`
    /// - `QC_RC_DB_DIR`, `QC_RC_DB_COUNT`
    /// - `QC_RC_DATA_ROOT`
    /// - `QC_RC_LOG_PATH`
    /// - `QC_RC_MONITOR`
    /// - `QC_RC_LANE_CAPACITY`
    /// - `QC_RC_CALCULATION_PERIOD`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            socket_path: env_path("QC_RC_SOCKET_PATH").unwrap_or(defaults.socket_path),
            ipc_timeout: env_parse("QC_RC_IPC_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.ipc_timeout),
            engine_binary: env_path("QC_RC_ENGINE_BINARY").unwrap_or(defaults.engine_binary),
            db_dir: env_path("QC_RC_DB_DIR").unwrap_or(defaults.db_dir),
            db_count: env_parse("QC_RC_DB_COUNT").unwrap_or(defaults.db_count),
            data_root: env_path("QC_RC_DATA_ROOT").unwrap_or(defaults.data_root),
            log_path: env_path("QC_RC_LOG_PATH").unwrap_or(defaults.log_path),
            monitor: env::var("QC_RC_MONITOR")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(defaults.monitor),
            lane_capacity: env_parse("QC_RC_LANE_CAPACITY").unwrap_or(defaults.lane_capacity),
            calculation_period: env_parse("QC_RC_CALCULATION_PERIOD")
                .filter(|p| *p > 0)
                .unwrap_or(defaults.calculation_period),
            header_version: defaults.header_version,
        }
    }

    /// Arguments for starting the engine.
    pub fn launch_spec(&self) -> EngineLaunchSpec {
        EngineLaunchSpec {
            binary: self.engine_binary.clone(),
            db_dir: self.db_dir.clone(),
            db_count: self.db_count,
            data_root: self.data_root.clone(),
            socket_path: self.socket_path.clone(),
            log_path: self.log_path.clone(),
            monitor: self.monitor,
        }
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    env::var_os(name).filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
