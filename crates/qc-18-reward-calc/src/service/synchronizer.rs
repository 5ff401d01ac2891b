//! # Commit Synchronizer
//!
//! Keeps the data log and the engine in step with block processing.
//!
//! ```text
//! AwaitingBlock(h) -> RecordsAppended(h) -> [PeriodSealed(h)] -> BlockCommitted(h) -> AwaitingBlock(h+1)
//! ```
//!
//! Per block the produce info, changed P-Rep set and transaction records are
//! flushed, then COMMIT_BLOCK is sent. When `h` reaches the next calculation
//! height the header and governance variables are appended, the log is
//! rotated into a snapshot and CALCULATE is sent for it before the commit.
//!
//! ## Uncommitted blocks
//!
//! Progress (last committed block, last sealed height, next calculation
//! height) is written in one metadata batch once COMMIT_BLOCK succeeds.
//! Until then the block is in flight:
//!
//! - the same block can be driven again; steps already done are skipped
//! - a rollback, or a restart, removes its records from the live log and
//!   moves an uncommitted snapshot back into place

use crate::domain::entities::CalculateAck;
use crate::domain::errors::RewardCalcError;
use crate::domain::records::*;
use crate::ports::inbound::RewardCalcApi;
use crate::ports::outbound::{BatchOperation, KeyValueStore};
use crate::service::data_log::{snapshot_path, DataLog};
use shared_types::{BlockHeight, BlockRef, U256};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Metadata key of the next calculation height.
pub const NEXT_CALC_HEIGHT_KEY: &[u8] = b"next_calc_height";

/// Metadata key of the last committed block (`be64(height) || hash`).
pub const LAST_COMMITTED_KEY: &[u8] = b"last_committed_block";

/// Metadata key of the height of the last committed period boundary.
pub const LAST_SEALED_KEY: &[u8] = b"last_sealed_height";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    AwaitingBlock(BlockHeight),
    RecordsAppended(BlockHeight),
    PeriodSealed(BlockHeight),
    BlockCommitted(BlockHeight),
}

/// What the node hands over for one processed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockData {
    pub block: BlockRef,
    /// Protocol revision written into the header at period boundaries.
    pub revision: u32,
    pub produce_info: Option<BlockProduceInfo>,
    /// Current main and sub P-Reps. Appended only when they changed.
    pub preps: Option<PRepSnapshot>,
    pub transactions: Vec<TxRecord>,
    /// Governance values in force, written at period boundaries.
    pub governance: GovernanceVariables,
}

/// Result of processing one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOutcome {
    pub block: BlockRef,
    /// Transaction records appended for this block.
    pub transactions: usize,
    /// Set when the block closed a calculation period.
    pub sealed: Option<SealedPeriod>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPeriod {
    pub snapshot_path: PathBuf,
    pub ack: CalculateAck,
}

/// Block whose records are flushed but which is not committed yet.
#[derive(Debug, Clone)]
struct InFlight {
    block: BlockRef,
    sealed: Option<SealedPeriod>,
}

pub struct CommitSynchronizer {
    api: Arc<dyn RewardCalcApi>,
    data_log: DataLog,
    metadata: Box<dyn KeyValueStore>,
    period: u64,
    header_version: u32,
    phase: SyncPhase,
    next_calc_height: BlockHeight,
    last_committed: Option<BlockRef>,
    last_sealed: Option<BlockHeight>,
    in_flight: Option<InFlight>,
    last_preps: Option<(U256, Vec<PRepDelegation>)>,
}

impl CommitSynchronizer {
    /// Restore progress from `metadata`. A fresh store starts at genesis.
    ///
    /// Records of blocks after the last committed one are removed from the
    /// data log.
    pub fn new(
        api: Arc<dyn RewardCalcApi>,
        data_log: DataLog,
        metadata: Box<dyn KeyValueStore>,
        period: u64,
        header_version: u32,
    ) -> Result<Self, RewardCalcError> {
        if period == 0 {
            return Err(RewardCalcError::invariant("calculation period must be positive"));
        }
        let next_calc_height = match metadata.get(NEXT_CALC_HEIGHT_KEY)? {
            Some(bytes) => decode_height(&bytes)?,
            None => 0,
        };
        let last_sealed = metadata
            .get(LAST_SEALED_KEY)?
            .map(|bytes| decode_height(&bytes))
            .transpose()?;
        let last_committed = metadata
            .get(LAST_COMMITTED_KEY)?
            .map(|bytes| decode_block_ref(&bytes))
            .transpose()?;
        let expected = last_committed.map_or(0, |b| b.height + 1);

        let mut sync = Self {
            api,
            data_log,
            metadata,
            period,
            header_version,
            phase: SyncPhase::AwaitingBlock(expected),
            next_calc_height,
            last_committed,
            last_sealed,
            in_flight: None,
            last_preps: None,
        };
        sync.discard_uncommitted(last_committed.map(|b| b.height))?;

        info!(
            next_calc_height,
            last_sealed = ?last_sealed,
            last_committed = ?last_committed.map(|b| b.height),
            "[qc-18] Commit synchronizer restored"
        );
        Ok(sync)
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn next_calc_height(&self) -> BlockHeight {
        self.next_calc_height
    }

    pub fn last_committed(&self) -> Option<BlockRef> {
        self.last_committed
    }

    /// Height of the most recent committed period boundary, if any.
    pub fn last_sealed_height(&self) -> Option<BlockHeight> {
        self.last_sealed
    }

    pub fn data_log(&self) -> &DataLog {
        &self.data_log
    }

    /// Align the engine with the last committed height.
    pub async fn init(&self) -> Result<(), RewardCalcError> {
        let height = self.last_committed.map_or(0, |b| b.height);
        self.api.init_reward_calculator(height).await?;
        Ok(())
    }

    /// Process block 0: always seals a period, then commits once.
    pub async fn genesis(&mut self, data: BlockData) -> Result<BlockOutcome, RewardCalcError> {
        if data.block.height != 0 {
            return Err(RewardCalcError::invariant(format!(
                "genesis block has height {}",
                data.block.height
            )));
        }
        self.run_block(data, true).await
    }

    /// Process the next block in sequence, or drive an in-flight block again.
    ///
    /// ## Errors
    ///
    /// - `StructuralInvariant`: the block is neither the one awaited nor the
    ///   one in flight, or carries records for another height
    pub async fn process_block(&mut self, data: BlockData) -> Result<BlockOutcome, RewardCalcError> {
        let boundary = data.block.height == self.next_calc_height;
        self.run_block(data, boundary).await
    }

    async fn run_block(
        &mut self,
        data: BlockData,
        boundary: bool,
    ) -> Result<BlockOutcome, RewardCalcError> {
        let height = data.block.height;
        let resuming = match (self.phase, &self.in_flight) {
            (SyncPhase::AwaitingBlock(expected), _) if expected == height => false,
            (SyncPhase::RecordsAppended(h) | SyncPhase::PeriodSealed(h), Some(in_flight))
                if h == height && in_flight.block == data.block =>
            {
                true
            }
            (phase, _) => {
                warn!(block_height = height, ?phase, "[qc-18] Out-of-order block");
                return Err(RewardCalcError::invariant(format!(
                    "block {} out of order in phase {:?}",
                    height, phase
                )));
            }
        };

        if resuming {
            info!(block_height = height, phase = ?self.phase, "[qc-18] Resuming in-flight block");
        } else {
            check_record_heights(&data)?;
            if let Err(e) = self.append_block_records(&data) {
                self.data_log.discard_pending();
                return Err(e);
            }
            self.in_flight = Some(InFlight {
                block: data.block,
                sealed: None,
            });
            self.phase = SyncPhase::RecordsAppended(height);
        }

        if boundary && self.phase == SyncPhase::RecordsAppended(height) {
            let sealed = self.seal_period(&data, resuming).await?;
            if let Some(in_flight) = self.in_flight.as_mut() {
                in_flight.sealed = Some(sealed);
            }
            self.phase = SyncPhase::PeriodSealed(height);
        }

        self.api.commit_block(true, height, data.block.hash).await?;
        self.phase = SyncPhase::BlockCommitted(height);
        let sealed = self.in_flight.take().and_then(|f| f.sealed);
        self.record_commit(data.block, boundary)?;

        self.phase = SyncPhase::AwaitingBlock(height + 1);
        let transactions = data.transactions.len();
        debug!(block_height = height, transactions, "[qc-18] Block synchronized");
        Ok(BlockOutcome {
            block: data.block,
            transactions,
            sealed,
        })
    }

    fn append_block_records(&mut self, data: &BlockData) -> Result<(), RewardCalcError> {
        if let Some(info) = &data.produce_info {
            self.data_log
                .append(&DataRecord::BlockProduceInfo(info.clone()))?;
        }
        let mut changed_preps = None;
        if let Some(preps) = &data.preps {
            let current = (preps.total_delegation, preps.preps.clone());
            if self.last_preps.as_ref() != Some(&current) {
                self.data_log.append(&DataRecord::PReps(preps.clone()))?;
                changed_preps = Some(current);
            }
        }
        for tx in &data.transactions {
            self.data_log.append(&DataRecord::Transaction(tx.clone()))?;
        }
        self.data_log.flush()?;
        if changed_preps.is_some() {
            self.last_preps = changed_preps;
        }
        Ok(())
    }

    /// Rotate the log and request the calculation. When resuming, a snapshot
    /// already sealed for this height is reused.
    async fn seal_period(
        &mut self,
        data: &BlockData,
        resuming: bool,
    ) -> Result<SealedPeriod, RewardCalcError> {
        let height = data.block.height;
        let existing = snapshot_path(self.data_log.root(), height);
        let snapshot_path = if resuming && existing.is_dir() {
            debug!(block_height = height, "[qc-18] Reusing sealed snapshot");
            existing
        } else {
            match self.close_period(data) {
                Ok(path) => path,
                Err(e) => {
                    self.data_log.discard_pending();
                    return Err(e);
                }
            }
        };

        let ack = self.api.calculate(&snapshot_path, height).await?;
        info!(
            block_height = height,
            snapshot = %snapshot_path.display(),
            "[qc-18] Calculation period sealed"
        );
        Ok(SealedPeriod { snapshot_path, ack })
    }

    fn close_period(&mut self, data: &BlockData) -> Result<PathBuf, RewardCalcError> {
        let height = data.block.height;
        self.data_log.append(&DataRecord::Header(Header {
            version: self.header_version,
            block_height: height,
            revision: data.revision,
        }))?;
        self.data_log
            .append(&DataRecord::GovernanceVariables(GovernanceVariables {
                block_height: height,
                ..data.governance
            }))?;
        self.data_log.rotate(height)
    }

    fn record_commit(&mut self, block: BlockRef, sealed: bool) -> Result<(), RewardCalcError> {
        let mut batch = vec![BatchOperation::put(
            LAST_COMMITTED_KEY,
            encode_block_ref(&block),
        )];
        if sealed {
            self.next_calc_height = block.height + self.period;
            self.last_sealed = Some(block.height);
            batch.push(BatchOperation::put(
                NEXT_CALC_HEIGHT_KEY,
                self.next_calc_height.to_be_bytes(),
            ));
            batch.push(BatchOperation::put(LAST_SEALED_KEY, block.height.to_be_bytes()));
            info!(
                block_height = block.height,
                next_calc_height = self.next_calc_height,
                "[qc-18] Calculation period committed"
            );
        }
        self.last_committed = Some(block);
        self.metadata.atomic_batch_write(batch)?;
        Ok(())
    }

    /// Undo data log writes for blocks above `keep` (all blocks when `None`).
    fn discard_uncommitted(&mut self, keep: Option<BlockHeight>) -> Result<(), RewardCalcError> {
        let pending_seal = self.next_calc_height;
        let seal_uncommitted = keep.map_or(true, |keep| pending_seal > keep);
        if seal_uncommitted && snapshot_path(self.data_log.root(), pending_seal).is_dir() {
            self.data_log.truncate_after(keep)?;
            self.data_log.unseal(pending_seal)?;
        }
        self.data_log.truncate_after(keep)?;
        self.in_flight = None;
        self.last_preps = None;
        Ok(())
    }

    /// Roll the engine back to `target` and wait for `target.height + 1`.
    ///
    /// Records of later blocks are removed from the data log.
    ///
    /// ## Errors
    ///
    /// - `StructuralInvariant`: `target` is above the last committed block,
    ///   or precedes the last sealed period, whose snapshot has already been
    ///   handed to the engine
    pub async fn rollback(&mut self, target: BlockRef) -> Result<(), RewardCalcError> {
        if self.last_committed.map_or(true, |c| target.height > c.height) {
            return Err(RewardCalcError::invariant(format!(
                "rollback to {} is above the last committed block {:?}",
                target.height,
                self.last_committed.map(|c| c.height)
            )));
        }
        if let Some(last_sealed) = self.last_sealed {
            if target.height < last_sealed {
                return Err(RewardCalcError::invariant(format!(
                    "rollback to {} crosses the period sealed at {}",
                    target.height, last_sealed
                )));
            }
        }
        self.api.rollback(target.height, target.hash).await?;
        self.discard_uncommitted(Some(target.height))?;
        self.last_committed = Some(target);
        self.metadata
            .put(LAST_COMMITTED_KEY, &encode_block_ref(&target))?;
        self.phase = SyncPhase::AwaitingBlock(target.height + 1);
        info!(block_height = target.height, "[qc-18] Synchronizer rewound");
        Ok(())
    }
}

fn check_record_heights(data: &BlockData) -> Result<(), RewardCalcError> {
    let height = data.block.height;
    let stray = data
        .produce_info
        .iter()
        .map(|bp| bp.block_height)
        .chain(data.preps.iter().map(|p| p.block_height))
        .chain(data.transactions.iter().map(|tx| tx.block_height))
        .find(|h| *h != height);
    match stray {
        Some(other) => Err(RewardCalcError::invariant(format!(
            "block {} carries a record for block {}",
            height, other
        ))),
        None => Ok(()),
    }
}

fn decode_height(bytes: &[u8]) -> Result<BlockHeight, RewardCalcError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| RewardCalcError::Storage("malformed next_calc_height".to_string()))?;
    Ok(u64::from_be_bytes(raw))
}

fn encode_block_ref(block: &BlockRef) -> [u8; 40] {
    let mut out = [0u8; 40];
    out[..8].copy_from_slice(&block.height.to_be_bytes());
    out[8..].copy_from_slice(&block.hash);
    out
}

fn decode_block_ref(bytes: &[u8]) -> Result<BlockRef, RewardCalcError> {
    if bytes.len() != 40 {
        return Err(RewardCalcError::Storage(
            "malformed last committed block".to_string(),
        ));
    }
    let height = decode_height(&bytes[..8])?;
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes[8..]);
    Ok(BlockRef::new(height, hash))
}
