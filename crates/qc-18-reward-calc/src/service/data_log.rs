//! # Per-Block Data Log
//!
//! Append target for the records the engine reads. Lives at
//! `<root>/current_db`; at each calculation boundary it is renamed to
//! `<root>/iiss_rc_db_<height>` and a fresh log takes its place.
//!
//! Writes are buffered until [`DataLog::flush`], which commits them together
//! with the last transaction index in one atomic batch. Transaction indices
//! start at 0 in every log and are contiguous.

use crate::domain::errors::RewardCalcError;
use crate::domain::records::{DataRecord, RecordKey, LAST_TX_INDEX_KEY};
use crate::ports::outbound::{BatchOperation, KeyValueStore, StoreOpener};
use quantum_telemetry::{
    time_histogram, RC_DATA_LOG_FLUSH_DURATION, RC_DATA_LOG_RECORDS, RC_DATA_LOG_ROTATIONS,
};
use shared_types::BlockHeight;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Directory of the live log under the data root.
pub const CURRENT_DB_DIR: &str = "current_db";

/// Directory name prefix of sealed snapshots.
pub const SNAPSHOT_DIR_PREFIX: &str = "iiss_rc_db_";

/// Path of the snapshot sealed at `block_height`.
pub fn snapshot_path(root: &Path, block_height: BlockHeight) -> PathBuf {
    root.join(format!("{}{}", SNAPSHOT_DIR_PREFIX, block_height))
}

/// Delete the snapshot sealed at `block_height`. Returns whether it existed.
pub fn remove_snapshot_in(root: &Path, block_height: BlockHeight) -> Result<bool, RewardCalcError> {
    let path = snapshot_path(root, block_height);
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_dir_all(&path)?;
    info!(block_height, path = %path.display(), "[qc-18] Snapshot removed");
    Ok(true)
}

fn decode_index(bytes: &[u8]) -> Result<u64, RewardCalcError> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| {
        RewardCalcError::Storage(format!(
            "last transaction index has {} bytes, expected 8",
            bytes.len()
        ))
    })?;
    Ok(u64::from_be_bytes(raw))
}

/// Open the store at `path`, creating the directory if needed, and read its
/// last transaction index.
fn open_store(
    opener: &dyn StoreOpener,
    path: &Path,
) -> Result<(Box<dyn KeyValueStore>, Option<u64>), RewardCalcError> {
    fs::create_dir_all(path)?;
    let store = opener.open(path)?;
    let last_index = store
        .get(LAST_TX_INDEX_KEY)?
        .map(|bytes| decode_index(&bytes))
        .transpose()?;
    Ok((store, last_index))
}

/// The live data log.
pub struct DataLog {
    root: PathBuf,
    opener: Arc<dyn StoreOpener>,
    /// `None` only while a rotation is moving directories.
    store: Option<Box<dyn KeyValueStore>>,
    pending: Vec<BatchOperation>,
    pending_records: Vec<&'static str>,
    /// Last index assigned, including unflushed appends. `None` for an empty log.
    last_index: Option<u64>,
    /// Last index persisted by a flush.
    flushed_index: Option<u64>,
}

impl DataLog {
    /// Open `<root>/current_db`, creating it if missing, and recover the last
    /// transaction index.
    pub fn open(root: &Path, opener: Arc<dyn StoreOpener>) -> Result<Self, RewardCalcError> {
        let (store, last_index) = open_store(opener.as_ref(), &root.join(CURRENT_DB_DIR))?;

        info!(
            root = %root.display(),
            last_transaction_index = ?last_index,
            "[qc-18] Data log opened"
        );
        Ok(Self {
            root: root.to_path_buf(),
            opener,
            store: Some(store),
            pending: Vec::new(),
            pending_records: Vec::new(),
            last_index,
            flushed_index: last_index,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn current_path(&self) -> PathBuf {
        self.root.join(CURRENT_DB_DIR)
    }

    /// Last assigned transaction index; `None` means no transaction yet (-1).
    pub fn last_transaction_index(&self) -> Option<u64> {
        self.last_index
    }

    /// Index the next transaction record will take.
    pub fn next_transaction_index(&self) -> u64 {
        self.last_index.map_or(0, |i| i + 1)
    }

    /// Number of buffered writes.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn store(&self) -> Result<&dyn KeyValueStore, RewardCalcError> {
        self.store
            .as_deref()
            .ok_or_else(|| RewardCalcError::invariant("data log is not open"))
    }

    fn store_mut(&mut self) -> Result<&mut Box<dyn KeyValueStore>, RewardCalcError> {
        self.store
            .as_mut()
            .ok_or_else(|| RewardCalcError::invariant("data log is not open"))
    }

    /// Buffer `record`. Transaction records take the next index.
    pub fn append(&mut self, record: &DataRecord) -> Result<RecordKey, RewardCalcError> {
        self.store()?;
        let key = match record.own_key() {
            Some(key) => key,
            None => RecordKey::Transaction(self.next_transaction_index()),
        };
        let value = record.encode_value()?;
        self.pending.push(BatchOperation::put(key.to_bytes(), value));
        self.pending_records.push(record.name());
        if let RecordKey::Transaction(index) = key {
            self.last_index = Some(index);
        }
        debug!(record = record.name(), key = ?key, "[qc-18] Record appended");
        Ok(key)
    }

    /// Commit buffered writes and the last transaction index atomically.
    pub fn flush(&mut self) -> Result<(), RewardCalcError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let _timer = time_histogram!(RC_DATA_LOG_FLUSH_DURATION);

        let mut batch = self.pending.clone();
        if self.last_index != self.flushed_index {
            if let Some(index) = self.last_index {
                batch.push(BatchOperation::put(LAST_TX_INDEX_KEY, index.to_be_bytes()));
            }
        }
        let count = batch.len();
        self.store_mut()?.atomic_batch_write(batch)?;

        for name in self.pending_records.drain(..) {
            RC_DATA_LOG_RECORDS.with_label_values(&[name]).inc();
        }
        self.pending.clear();
        self.flushed_index = self.last_index;
        debug!(operations = count, "[qc-18] Data log flushed");
        Ok(())
    }

    /// Drop unflushed writes and restore the index to the last flushed one.
    pub fn discard_pending(&mut self) {
        if !self.pending.is_empty() {
            warn!(dropped = self.pending.len(), "[qc-18] Discarding unflushed records");
        }
        self.pending.clear();
        self.pending_records.clear();
        self.last_index = self.flushed_index;
    }

    /// Delete every flushed record written for a block above `keep`, or every
    /// record when `keep` is `None`, and drop unflushed writes.
    ///
    /// Transactions are cut at the first index whose block is above `keep`
    /// so the remaining indices stay contiguous. Deletions and the restored
    /// last index are written as one atomic batch. Returns the number of
    /// records removed.
    pub fn truncate_after(&mut self, keep: Option<BlockHeight>) -> Result<usize, RewardCalcError> {
        self.discard_pending();
        let beyond = |height: BlockHeight| keep.map_or(true, |keep| height > keep);

        let records = decode_all(self.store()?)?;
        let cut = records
            .iter()
            .filter_map(|(key, record)| match key {
                RecordKey::Transaction(index) if beyond(record.block_height()) => Some(*index),
                _ => None,
            })
            .min();

        let mut batch: Vec<BatchOperation> = records
            .iter()
            .filter(|(key, record)| match (key, cut) {
                (RecordKey::Transaction(index), Some(cut)) => *index >= cut,
                (RecordKey::Transaction(_), None) => false,
                _ => beyond(record.block_height()),
            })
            .map(|(key, _)| BatchOperation::delete(key.to_bytes()))
            .collect();
        let removed = batch.len();
        if removed == 0 {
            return Ok(0);
        }

        let last_index = match cut {
            Some(cut) => cut.checked_sub(1),
            None => self.flushed_index,
        };
        if cut.is_some() {
            batch.push(match last_index {
                Some(index) => BatchOperation::put(LAST_TX_INDEX_KEY, index.to_be_bytes()),
                None => BatchOperation::delete(LAST_TX_INDEX_KEY),
            });
        }
        self.store_mut()?.atomic_batch_write(batch)?;
        self.last_index = last_index;
        self.flushed_index = last_index;

        warn!(
            removed,
            keep = ?keep,
            last_transaction_index = ?last_index,
            "[qc-18] Data log truncated"
        );
        Ok(removed)
    }

    /// Move the snapshot sealed at `block_height` back into place as the live
    /// log, undoing a rotation whose block was never committed.
    ///
    /// ## Errors
    ///
    /// - `StructuralInvariant`: the snapshot is missing or the live log
    ///   already holds records
    pub fn unseal(&mut self, block_height: BlockHeight) -> Result<(), RewardCalcError> {
        let snapshot = snapshot_path(&self.root, block_height);
        if !snapshot.is_dir() {
            return Err(RewardCalcError::invariant(format!(
                "no snapshot at {}",
                snapshot.display()
            )));
        }
        if !self.pending.is_empty()
            || self.last_index.is_some()
            || !decode_all(self.store()?)?.is_empty()
        {
            return Err(RewardCalcError::invariant(
                "cannot unseal over a live log with records",
            ));
        }

        let current = self.current_path();
        self.store = None;
        let moved = fs::remove_dir_all(&current).and_then(|_| fs::rename(&snapshot, &current));
        let (store, last_index) = open_store(self.opener.as_ref(), &current)?;
        self.store = Some(store);
        moved?;
        self.last_index = last_index;
        self.flushed_index = last_index;

        info!(
            block_height,
            last_transaction_index = ?last_index,
            "[qc-18] Snapshot moved back to the live log"
        );
        Ok(())
    }

    /// Seal the current log as the snapshot for `block_height` and start a
    /// fresh one. Returns the snapshot path.
    ///
    /// ## Errors
    ///
    /// - `StructuralInvariant`: the current log is missing or the snapshot
    ///   directory already exists
    pub fn rotate(&mut self, block_height: BlockHeight) -> Result<PathBuf, RewardCalcError> {
        let current = self.current_path();
        let snapshot = snapshot_path(&self.root, block_height);
        if self.store.is_none() || !current.exists() {
            return Err(RewardCalcError::invariant(format!(
                "no current data log at {}",
                current.display()
            )));
        }
        if snapshot.exists() {
            return Err(RewardCalcError::invariant(format!(
                "snapshot {} already exists",
                snapshot.display()
            )));
        }

        self.flush()?;
        // The store must be closed before its directory moves.
        self.store = None;
        let moved = fs::rename(&current, &snapshot);
        let (store, last_index) = open_store(self.opener.as_ref(), &current)?;
        self.store = Some(store);
        moved?;
        self.last_index = last_index;
        self.flushed_index = last_index;

        RC_DATA_LOG_ROTATIONS.inc();
        info!(
            block_height,
            snapshot = %snapshot.display(),
            "[qc-18] Data log rotated"
        );
        Ok(snapshot)
    }

    /// Sealed snapshots under the root, ordered by height.
    pub fn snapshot_paths(&self) -> Result<Vec<(BlockHeight, PathBuf)>, RewardCalcError> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(height) = name
                .to_str()
                .and_then(|n| n.strip_prefix(SNAPSHOT_DIR_PREFIX))
                .and_then(|h| h.parse::<BlockHeight>().ok())
            else {
                continue;
            };
            snapshots.push((height, entry.path()));
        }
        snapshots.sort_by_key(|(height, _)| *height);
        Ok(snapshots)
    }

    pub fn remove_snapshot(&self, block_height: BlockHeight) -> Result<bool, RewardCalcError> {
        remove_snapshot_in(&self.root, block_height)
    }

    /// Flushed records of the live log, in key order.
    pub fn records(&self) -> Result<Vec<(RecordKey, DataRecord)>, RewardCalcError> {
        decode_all(self.store()?)
    }

    /// Records of a sealed snapshot, in key order.
    pub fn read_records(&self, path: &Path) -> Result<Vec<(RecordKey, DataRecord)>, RewardCalcError> {
        if !path.is_dir() {
            return Err(RewardCalcError::invariant(format!(
                "no data log at {}",
                path.display()
            )));
        }
        let store = self.opener.open(path)?;
        decode_all(store.as_ref())
    }
}

fn decode_all(store: &dyn KeyValueStore) -> Result<Vec<(RecordKey, DataRecord)>, RewardCalcError> {
    store
        .prefix_scan(&[])?
        .into_iter()
        .filter(|(key, _)| RecordKey::parse(key).is_some())
        .map(|(key, value)| DataRecord::decode(&key, &value))
        .collect()
}
