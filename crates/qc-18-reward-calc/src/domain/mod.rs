//! # Domain Layer
//!
//! Types shared by every layer of the reward calculator subsystem.
//!
//! ## Modules
//!
//! - `entities` - Typed payloads exchanged with the engine
//! - `value_objects` - Status codes and engine liveness
//! - `records` - Data log records and their key/value encoding
//! - `config` - Proxy, engine and data log settings
//! - `errors` - Domain error types

pub mod config;
pub mod entities;
pub mod errors;
pub mod records;
pub mod value_objects;
