//! # Node Runtime Library
//!
//! Hosts the reward calculation subsystem (qc-18) inside a node process.
//! The main entry point is the `main.rs` binary.
//!
//! - `config/` - Node configuration loaded from `QC_*` variables
//! - `handlers/` - Engine notification handling off the IPC event loop
//! - `runtime/` - Proxy, data log and synchronizer lifetime

pub mod config;
pub mod handlers;
pub mod runtime;

pub use config::{ConfigError, NodeConfig, StorageBackend, StorageConfig};
pub use handlers::{ChannelNotificationHandler, EngineEvent, SnapshotCleanupHandler};
pub use runtime::NodeRuntime;
