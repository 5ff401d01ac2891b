//! # Shared Types Crate
//!
//! Primitive types shared by the node runtime and the reward calculation
//! subsystem (qc-18).
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: addresses, hashes and amounts are defined once.
//! - **Wire Fidelity**: every type knows its exact byte form on the
//!   reward-calculator socket (21-byte prefixed addresses, minimal big-endian
//!   integers).

pub mod entities;
pub mod errors;
pub mod int_bytes;

pub use entities::*;
pub use errors::*;
pub use int_bytes::{u256_from_bytes, u256_to_bytes};
