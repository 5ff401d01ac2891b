//! # Core Domain Entities
//!
//! Primitive chain entities shared by the node runtime and the reward
//! calculation subsystem.
//!
//! ## Clusters
//!
//! - **Chain**: `Hash`, `BlockHeight`, `BlockRef`
//! - **Accounts**: `Address`, `AddressPrefix`
//! - **Amounts**: `U256` (delegations, I-Score)

use crate::errors::AddressError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Re-export U256 from primitive-types for use across all subsystems
pub use primitive_types::U256;

// =============================================================================
// CLUSTER A: THE CHAIN
// =============================================================================

/// A 32-byte block or transaction hash.
pub type Hash = [u8; 32];

/// Height of a block in the chain.
pub type BlockHeight = u64;

/// All-zero hash, used for the genesis parent and "no hash" fields.
pub const ZERO_HASH: Hash = [0u8; 32];

/// A `(height, hash)` pair identifying one committed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct BlockRef {
    /// Block height.
    pub height: BlockHeight,
    /// Block hash.
    pub hash: Hash,
}

impl BlockRef {
    pub fn new(height: BlockHeight, hash: Hash) -> Self {
        Self { height, hash }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@0x{}", self.height, hex::encode(&self.hash[..4]))
    }
}

// =============================================================================
// CLUSTER B: ACCOUNTS
// =============================================================================

/// Address kind, carried as the first byte of the 21-byte wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AddressPrefix {
    /// Externally owned account (`hx…`).
    Eoa,
    /// Contract account (`cx…`).
    Contract,
}

impl AddressPrefix {
    /// Wire byte for this prefix.
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Eoa => 0x00,
            Self::Contract => 0x01,
        }
    }

    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Eoa),
            0x01 => Some(Self::Contract),
            _ => None,
        }
    }

    /// Two-character textual prefix.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eoa => "hx",
            Self::Contract => "cx",
        }
    }
}

/// A 20-byte account address tagged with its kind.
///
/// On the reward-calculator wire the address is always 21 bytes: the prefix
/// byte followed by the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    prefix: AddressPrefix,
    body: [u8; 20],
}

impl Address {
    /// Length of the address body.
    pub const BODY_LEN: usize = 20;

    /// Length of the prefixed wire form.
    pub const WIRE_LEN: usize = 21;

    pub const fn new(prefix: AddressPrefix, body: [u8; 20]) -> Self {
        Self { prefix, body }
    }

    /// Externally owned account address.
    pub const fn eoa(body: [u8; 20]) -> Self {
        Self::new(AddressPrefix::Eoa, body)
    }

    /// Contract address.
    pub const fn contract(body: [u8; 20]) -> Self {
        Self::new(AddressPrefix::Contract, body)
    }

    pub fn prefix(&self) -> AddressPrefix {
        self.prefix
    }

    pub fn body(&self) -> &[u8; 20] {
        &self.body
    }

    pub fn is_contract(&self) -> bool {
        self.prefix == AddressPrefix::Contract
    }

    /// Encode as `prefix || body`.
    pub fn to_bytes_including_prefix(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0] = self.prefix.as_byte();
        out[1..].copy_from_slice(&self.body);
        out
    }

    /// Decode from the 21-byte `prefix || body` form.
    pub fn from_bytes_including_prefix(bytes: &[u8]) -> Result<Self, AddressError> {
        if bytes.len() != Self::WIRE_LEN {
            return Err(AddressError::InvalidLength {
                expected: Self::WIRE_LEN,
                actual: bytes.len(),
            });
        }
        let prefix =
            AddressPrefix::from_byte(bytes[0]).ok_or(AddressError::InvalidPrefix(bytes[0]))?;
        let mut body = [0u8; Self::BODY_LEN];
        body.copy_from_slice(&bytes[1..]);
        Ok(Self { prefix, body })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix.as_str(), hex::encode(self.body))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 2 + Self::BODY_LEN * 2 {
            return Err(AddressError::InvalidFormat(s.to_string()));
        }
        let prefix = match &s[..2] {
            "hx" => AddressPrefix::Eoa,
            "cx" => AddressPrefix::Contract,
            _ => return Err(AddressError::InvalidFormat(s.to_string())),
        };
        let mut body = [0u8; Self::BODY_LEN];
        hex::decode_to_slice(&s[2..], &mut body)
            .map_err(|_| AddressError::InvalidFormat(s.to_string()))?;
        Ok(Self { prefix, body })
    }
}
