//! # Outbound Ports (Driven Ports)
//!
//! Dependencies the reward calculator subsystem requires from its host:
//! key-value storage for the data log, a launcher for the engine process and
//! a handler for engine notifications.

use crate::domain::entities::{CalculateDoneInfo, ReadyInfo};
use crate::domain::errors::{KVStoreError, RewardCalcError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// =============================================================================
// STORAGE
// =============================================================================

/// Abstract interface for key-value database operations.
///
/// Production: `FileKVStore` (append-only, crc-checked) or `RocksDbStore`
/// behind the `rocksdb` feature. Testing: `InMemoryKVStore` (below).
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError>;

    /// Put a single key-value pair.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError>;

    /// Delete a key.
    fn delete(&mut self, key: &[u8]) -> Result<(), KVStoreError>;

    /// Execute an atomic batch write.
    ///
    /// Either ALL operations in the batch are applied, or NONE are.
    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError>;

    /// Check if a key exists.
    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError>;

    /// All pairs whose key starts with `prefix`, in key order.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError>;
}

/// Batch operation for atomic writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    /// Put a key-value pair.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Delete a key.
    Delete { key: Vec<u8> },
}

impl BatchOperation {
    /// Create a Put operation.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create a Delete operation.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }
}

/// Opens a store rooted at a directory.
///
/// The data log renames whole directories on rotation, so every store it uses
/// must live entirely inside the directory it was opened on and must be
/// dropped (closed) before that directory is moved.
pub trait StoreOpener: Send + Sync {
    fn open(&self, dir: &Path) -> Result<Box<dyn KeyValueStore>, KVStoreError>;
}

/// In-memory key-value store for testing.
#[derive(Debug, Default)]
pub struct InMemoryKVStore {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl InMemoryKVStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for InMemoryKVStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), KVStoreError> {
        self.data.remove(key);
        Ok(())
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => {
                    self.data.insert(key, value);
                }
                BatchOperation::Delete { key } => {
                    self.data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        Ok(self.data.contains_key(key))
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        Ok(self
            .data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Receives READY and CALCULATE_DONE notifications.
///
/// Called from the IPC event loop; implementations must not block. Work that
/// needs to await should be handed to another task.
pub trait NotificationHandler: Send + Sync {
    fn on_ready(&self, info: &ReadyInfo);

    fn on_calculate_done(&self, info: &CalculateDoneInfo);
}

/// Handler that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotificationHandler;

impl NotificationHandler for LoggingNotificationHandler {
    fn on_ready(&self, info: &ReadyInfo) {
        tracing::info!(
            version = info.version,
            block_height = info.block_height,
            "[qc-18] Reward calculator ready"
        );
    }

    fn on_calculate_done(&self, info: &CalculateDoneInfo) {
        tracing::info!(
            success = info.success,
            block_height = info.block_height,
            iscore = %info.iscore,
            "[qc-18] Calculation finished"
        );
    }
}

// =============================================================================
// ENGINE PROCESS
// =============================================================================

/// Everything needed to start the engine binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineLaunchSpec {
    pub binary: PathBuf,
    pub db_dir: PathBuf,
    pub db_count: u32,
    pub data_root: PathBuf,
    pub socket_path: PathBuf,
    pub log_path: PathBuf,
    pub monitor: bool,
}

impl EngineLaunchSpec {
    /// Command-line arguments; the engine always runs as a socket client.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-client".to_string(),
            "-db".to_string(),
            self.db_dir.display().to_string(),
            "-db-count".to_string(),
            self.db_count.to_string(),
            "-iissdata".to_string(),
            self.data_root.display().to_string(),
            "-ipc-addr".to_string(),
            self.socket_path.display().to_string(),
            "-log-file".to_string(),
            self.log_path.display().to_string(),
        ];
        if self.monitor {
            args.push("-monitor".to_string());
        }
        args
    }
}

/// Starts the engine process.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self, spec: &EngineLaunchSpec) -> Result<Box<dyn EngineHandle>, RewardCalcError>;
}

/// A running engine process.
#[async_trait]
pub trait EngineHandle: Send + Sync {
    /// OS process id, if known.
    fn id(&self) -> Option<u32>;

    /// Terminate unconditionally and reap the process.
    async fn terminate(&mut self) -> Result<(), RewardCalcError>;
}
