//! # Domain Entities
//!
//! Typed payloads exchanged with the reward calculator engine. Each response
//! and notification carries one of these; callers of the proxy receive them
//! directly.

use crate::domain::value_objects::{CalculateStatus, CalculationProgress};
use shared_types::{Address, BlockHeight, Hash, U256};

/// Identifies the claim transaction that moves I-Score out of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimRef {
    pub address: Address,
    pub block_height: BlockHeight,
    pub block_hash: Hash,
    pub tx_index: u32,
    pub tx_hash: Hash,
}

/// VERSION response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: u32,
    pub block_height: BlockHeight,
}

/// CALCULATE response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalculateAck {
    pub status: CalculateStatus,
    pub block_height: BlockHeight,
}

/// QUERY response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IScoreInfo {
    pub address: Address,
    pub iscore: U256,
    pub block_height: BlockHeight,
}

/// CLAIM response: the claim echoed back with the claimed amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimResult {
    pub claim: ClaimRef,
    pub iscore: U256,
}

/// COMMIT_BLOCK and ROLLBACK responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockAck {
    pub success: bool,
    pub block_height: BlockHeight,
    pub block_hash: Hash,
}

/// QUERY_CALCULATE_STATUS response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalculateStatusReport {
    pub status: CalculationProgress,
    pub block_height: BlockHeight,
}

/// QUERY_CALCULATE_RESULT response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalculateResultReport {
    pub status: CalculationProgress,
    pub block_height: BlockHeight,
    pub iscore: U256,
    pub state_hash: Vec<u8>,
}

/// INIT response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitAck {
    pub success: bool,
    pub block_height: BlockHeight,
}

/// READY notification: the engine finished loading and accepts requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyInfo {
    pub version: u32,
    pub block_height: BlockHeight,
    pub block_hash: Hash,
}

/// CALCULATE_DONE notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalculateDoneInfo {
    pub success: bool,
    pub block_height: BlockHeight,
    pub iscore: U256,
    pub state_hash: Vec<u8>,
}
