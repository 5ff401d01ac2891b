//! # Error Types
//!
//! Defines error types used across crates.

use thiserror::Error;

/// Errors parsing an [`Address`](crate::Address).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// Wire form has the wrong length.
    #[error("Invalid address length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Unknown prefix byte.
    #[error("Invalid address prefix byte: 0x{0:02x}")]
    InvalidPrefix(u8),

    /// Text form is not `hx`/`cx` followed by 40 hex characters.
    #[error("Invalid address format: {0}")]
    InvalidFormat(String),
}

/// Errors decoding a big integer from its signed big-endian byte form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntBytesError {
    /// The encoded value is negative where only unsigned values are allowed.
    #[error("Negative integer where unsigned expected")]
    Negative,

    /// The encoded value does not fit in 256 bits.
    #[error("Integer overflows 256 bits ({0} significant bytes)")]
    Overflow(usize),
}
