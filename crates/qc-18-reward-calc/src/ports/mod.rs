//! # Ports Layer
//!
//! ## Hexagonal Architecture
//!
//! - `inbound.rs` - Driving ports (the proxy API used by the synchronizer and the node)
//! - `outbound.rs` - Driven ports (storage, engine process, notifications)

pub mod inbound;
pub mod outbound;
