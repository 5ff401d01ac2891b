//! # Adapters Layer
//!
//! - `file_store` - Append-only, crc-checked key-value store (default data log backend)
//! - `rocksdb_store` - RocksDB key-value store (`rocksdb` feature)
//! - `process` - Launches the engine binary

pub mod file_store;
pub mod process;
#[cfg(feature = "rocksdb")]
pub mod rocksdb_store;

pub use file_store::{FileKVStore, FileStoreOpener};
pub use process::{ProcessHandle, ProcessLauncher};
#[cfg(feature = "rocksdb")]
pub use rocksdb_store::{RocksDbConfig, RocksDbOpener, RocksDbStore};
