//! # Reward Calculator IPC (qc-18)
//!
//! Keeps the node's ledger in step with an external reward calculation
//! engine. The engine runs as a separate process, connects to a Unix socket
//! the node listens on and speaks a MessagePack request/response protocol
//! with out-of-band notifications.
//!
//! ## Architecture
//!
//! ```text
//! block processing ──→ CommitSynchronizer ──→ DataLog (current_db → iiss_rc_db_<h>)
//!                              │
//!                              ↓
//!                      RewardCalcProxy ──→ IpcHandle ══lanes══→ IpcEventLoop
//!                                                                 │ CorrelationQueue
//!                                                                 ↓
//!                                                    Transport (Unix socket) ⇄ engine
//! ```
//!
//! ## Domain Invariants
//!
//! | ID | Invariant | Description |
//! |----|-----------|-------------|
//! | 1 | Unique msg_id | At most one pending call per id |
//! | 2 | READY first | Nothing but READY is accepted before READY |
//! | 3 | Contiguous indices | Transaction indices restart at 0 after each rotation |
//! | 4 | Atomic rotation | A snapshot directory is never overwritten |
//! | 5 | Ordered blocks | Blocks are synchronized strictly in height order |
//!
//! ## Crate Structure (Hexagonal Architecture)
//!
//! - `domain/` - Payloads, records, config and errors
//! - `ports/` - `RewardCalcApi` (inbound), storage/engine/notification ports (outbound)
//! - `ipc/` - Wire codec, unpacker, correlation queue, transport, event loop
//! - `adapters/` - File and RocksDB stores, engine process launcher
//! - `service/` - Proxy, data log, commit synchronizer
//!
//! ## Usage
//!
//! ```ignore
//! use qc_18_reward_calc::{RewardCalcProxy, RewardCalcConfig, ProcessLauncher, LoggingNotificationHandler};
//!
//! let config = RewardCalcConfig::from_env();
//! let proxy = RewardCalcProxy::new(config, Arc::new(LoggingNotificationHandler), Arc::new(ProcessLauncher))?;
//! proxy.start().await?;
//! proxy.wait_until_ready(Duration::from_secs(30)).await?;
//! let version = proxy.get_version().await?;
//! ```

pub mod adapters;
pub mod domain;
pub mod ipc;
pub mod ports;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export key types for convenience
pub use adapters::{FileKVStore, FileStoreOpener, ProcessHandle, ProcessLauncher};
#[cfg(feature = "rocksdb")]
pub use adapters::{RocksDbConfig, RocksDbOpener, RocksDbStore};
pub use domain::config::RewardCalcConfig;
pub use domain::entities::*;
pub use domain::errors::{KVStoreError, RewardCalcError};
pub use domain::records::{
    BlockProduceInfo, DataRecord, DelegationEntry, GovernanceVariables, Header, PRepDelegation,
    PRepSnapshot, RecordKey, TxData, TxRecord,
};
pub use domain::value_objects::{CalculateStatus, CalculationProgress, EngineLiveness};
pub use ipc::{IpcEventLoop, IpcHandle, Lane, MessageKind, Notification, Request, Response};
pub use ports::inbound::RewardCalcApi;
pub use ports::outbound::{
    BatchOperation, EngineHandle, EngineLaunchSpec, EngineLauncher, InMemoryKVStore, KeyValueStore,
    LoggingNotificationHandler, NotificationHandler, StoreOpener,
};
pub use service::{
    BlockData, BlockOutcome, CommitSynchronizer, DataLog, RewardCalcProxy, SealedPeriod, SyncPhase,
};
