//! # Big-Integer Byte Encoding
//!
//! Amounts (delegations, I-Score) travel as minimal two's-complement
//! big-endian byte strings. Values here are always non-negative, so a leading
//! `0x00` is emitted whenever the top bit of the first significant byte is set.

use crate::errors::IntBytesError;
use primitive_types::U256;

/// Encode `value` as the shortest signed big-endian byte string.
///
/// `0` encodes as `[0x00]`.
pub fn u256_to_bytes(value: &U256) -> Vec<u8> {
    let len = value.bits() / 8 + 1;
    let mut full = [0u8; 33];
    value.to_big_endian(&mut full[1..]);
    full[33 - len..].to_vec()
}

/// Decode a signed big-endian byte string into an unsigned `U256`.
///
/// An empty slice decodes to zero.
pub fn u256_from_bytes(bytes: &[u8]) -> Result<U256, IntBytesError> {
    if bytes.first().is_some_and(|b| b & 0x80 != 0) {
        return Err(IntBytesError::Negative);
    }
    let significant = match bytes.iter().position(|b| *b != 0) {
        Some(start) => &bytes[start..],
        None => return Ok(U256::zero()),
    };
    if significant.len() > 32 {
        return Err(IntBytesError::Overflow(significant.len()));
    }
    Ok(U256::from_big_endian(significant))
}
