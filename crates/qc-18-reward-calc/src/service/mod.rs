//! # Services
//!
//! - `proxy` - `RewardCalcProxy`, implements `RewardCalcApi` against the engine
//! - `data_log` - Per-block data log and snapshot rotation
//! - `synchronizer` - Drives the data log and the proxy once per block

pub mod data_log;
pub mod proxy;
pub mod synchronizer;

pub use data_log::{
    remove_snapshot_in, snapshot_path, DataLog, CURRENT_DB_DIR, SNAPSHOT_DIR_PREFIX,
};
pub use proxy::RewardCalcProxy;
pub use synchronizer::{BlockData, BlockOutcome, CommitSynchronizer, SealedPeriod, SyncPhase};
