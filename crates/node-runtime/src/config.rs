//! # Node Configuration
//!
//! Runtime parameters for hosting the reward calculator.
//!
//! All values have defaults; `QC_*` environment variables override them.

use qc_18_reward_calc::RewardCalcConfig;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Engine, socket and data log settings.
    pub reward_calc: RewardCalcConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// How long to wait for READY after launching the engine.
    pub ready_timeout: Duration,
    /// Capacity of the notification channel feeding snapshot cleanup.
    pub notification_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            reward_calc: RewardCalcConfig::default(),
            storage: StorageConfig::default(),
            ready_timeout: Duration::from_secs(30),
            notification_capacity: 64,
        }
    }
}

impl NodeConfig {
    /// Load from the environment.
    ///
    /// - `QC_RC_*` (see [`RewardCalcConfig::from_env`])
    /// - `QC_STORAGE_BACKEND`: `file` or `rocksdb`
    /// - `QC_METADATA_DIR`
    /// - `QC_RC_READY_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let backend = match env::var("QC_STORAGE_BACKEND") {
            Ok(value) if !value.is_empty() => value.parse()?,
            _ => defaults.storage.backend,
        };
        let metadata_dir = env::var_os("QC_METADATA_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.storage.metadata_dir);
        let ready_timeout = env::var("QC_RC_READY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.ready_timeout);

        let config = Self {
            reward_calc: RewardCalcConfig::from_env(),
            storage: StorageConfig {
                backend,
                metadata_dir,
            },
            ready_timeout,
            notification_capacity: defaults.notification_capacity,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the runtime cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.metadata_dir == self.reward_calc.data_root {
            return Err(ConfigError::SharedMetadataDir(
                self.storage.metadata_dir.clone(),
            ));
        }
        if self.storage.backend == StorageBackend::RocksDb && !cfg!(feature = "rocksdb") {
            return Err(ConfigError::BackendUnavailable("rocksdb"));
        }
        Ok(())
    }
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Backend for the data log and synchronizer metadata.
    pub backend: StorageBackend,
    /// Directory of the synchronizer metadata store. Must not be the data
    /// log root, which is renamed on rotation.
    pub metadata_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            metadata_dir: PathBuf::from("./data/rc-meta"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Append-only file store.
    File,
    /// RocksDB; needs the `rocksdb` feature.
    RocksDb,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(Self::File),
            "rocksdb" => Ok(Self::RocksDb),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown storage backend '{0}' (expected 'file' or 'rocksdb')")]
    UnknownBackend(String),

    #[error("storage backend '{0}' is not compiled in")]
    BackendUnavailable(&'static str),

    #[error("metadata dir {0:?} must differ from the data log root")]
    SharedMetadataDir(PathBuf),
}
