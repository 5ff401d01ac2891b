//! # Inbound Ports (Driving Ports)
//!
//! The API the node and the commit synchronizer drive. `RewardCalcProxy`
//! implements it against the real engine.

use crate::domain::entities::*;
use crate::domain::errors::RewardCalcError;
use async_trait::async_trait;
use shared_types::{Address, BlockHeight, Hash};
use std::path::Path;

/// Operations on the external reward calculator.
///
/// Every call that expects a response waits at most the configured IPC
/// timeout and fails with `Timeout` afterwards. All calls fail with
/// `EngineNotReady` until the engine has announced READY.
#[async_trait]
pub trait RewardCalcApi: Send + Sync {
    /// Engine protocol version and last processed height.
    async fn get_version(&self) -> Result<VersionInfo, RewardCalcError>;

    /// Ask the engine to calculate from a sealed snapshot.
    ///
    /// ## Errors
    ///
    /// - `StructuralInvariant`: a rollback is in flight
    /// - `Rejected`: the engine answered with failure status
    async fn calculate(
        &self,
        snapshot_path: &Path,
        block_height: BlockHeight,
    ) -> Result<CalculateAck, RewardCalcError>;

    /// Claim the accrued I-Score of `claim.address`.
    async fn claim_iscore(&self, claim: ClaimRef) -> Result<ClaimResult, RewardCalcError>;

    /// Confirm or abandon a claim. No response is expected.
    async fn commit_claim(&self, success: bool, claim: ClaimRef) -> Result<(), RewardCalcError>;

    /// Current I-Score of `address`, served on the query lane.
    async fn query_iscore(&self, address: Address) -> Result<IScoreInfo, RewardCalcError>;

    async fn query_calculate_status(&self) -> Result<CalculateStatusReport, RewardCalcError>;

    async fn query_calculate_result(
        &self,
        block_height: BlockHeight,
    ) -> Result<CalculateResultReport, RewardCalcError>;

    /// Tell the engine a block was committed (or rejected, with `success = false`).
    ///
    /// ## Errors
    ///
    /// - `StructuralInvariant`: a rollback is in flight
    async fn commit_block(
        &self,
        success: bool,
        block_height: BlockHeight,
        block_hash: Hash,
    ) -> Result<BlockAck, RewardCalcError>;

    /// Align the engine with the node's last committed height on startup.
    async fn init_reward_calculator(
        &self,
        block_height: BlockHeight,
    ) -> Result<InitAck, RewardCalcError>;

    /// Rewind the engine to `block_height`.
    async fn rollback(
        &self,
        block_height: BlockHeight,
        block_hash: Hash,
    ) -> Result<BlockAck, RewardCalcError>;

    fn is_ready(&self) -> bool;
}
