//! # Node Runtime
//!
//! Owns the reward calculator proxy, the data log and the commit
//! synchronizer, plus the background task that cleans up snapshots.
//!
//! ## Startup Sequence
//!
//! 1. Bind the IPC socket and start the event loop
//! 2. Open the data log and the synchronizer metadata store
//! 3. Launch the engine and wait for READY
//! 4. Send INIT at the last committed height
//!
//! ## Shutdown Sequence
//!
//! 1. Close the proxy (event loop, engine process, socket file)
//! 2. Let the cleanup handler drain and exit

use crate::config::{NodeConfig, StorageBackend};
use crate::handlers::{ChannelNotificationHandler, SnapshotCleanupHandler};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use qc_18_reward_calc::{
    BlockData, BlockOutcome, CommitSynchronizer, DataLog, DataRecord, EngineLauncher,
    FileStoreOpener, RecordKey, RewardCalcProxy, StoreOpener,
};
use shared_types::BlockRef;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// How long shutdown waits for the cleanup handler to drain.
const CLEANUP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct NodeRuntime {
    config: NodeConfig,
    proxy: Arc<RewardCalcProxy>,
    synchronizer: tokio::sync::Mutex<CommitSynchronizer>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl NodeRuntime {
    /// Wire everything up without launching the engine.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(config: NodeConfig, launcher: Arc<dyn EngineLauncher>) -> Result<Self> {
        config.validate()?;
        let opener = store_opener(config.storage.backend)?;

        let (handler, receiver) =
            ChannelNotificationHandler::new(config.notification_capacity);
        let proxy = Arc::new(
            RewardCalcProxy::new(config.reward_calc.clone(), Arc::new(handler), launcher)
                .context("failed to bind reward calculator socket")?,
        );

        let data_log = DataLog::open(&config.reward_calc.data_root, Arc::clone(&opener))
            .context("failed to open data log")?;
        let metadata = opener
            .open(&config.storage.metadata_dir)
            .context("failed to open synchronizer metadata")?;
        let synchronizer = CommitSynchronizer::new(
            proxy.clone(),
            data_log,
            metadata,
            config.reward_calc.calculation_period,
            config.reward_calc.header_version,
        )?;

        let cleanup = tokio::spawn(
            SnapshotCleanupHandler::new(receiver, config.reward_calc.data_root.clone()).run(),
        );

        Ok(Self {
            config,
            proxy,
            synchronizer: tokio::sync::Mutex::new(synchronizer),
            cleanup: Mutex::new(Some(cleanup)),
        })
    }

    /// Launch the engine, wait for READY and align it with the last
    /// committed block.
    pub async fn start(&self) -> Result<()> {
        info!(
            socket = %self.config.reward_calc.socket_path.display(),
            engine = %self.config.reward_calc.engine_binary.display(),
            "Starting reward calculator"
        );
        self.proxy.start().await?;
        self.proxy
            .wait_until_ready(self.config.ready_timeout)
            .await
            .context("reward calculator did not become ready")?;
        self.synchronizer.lock().await.init().await?;
        info!("Reward calculator synchronized");
        Ok(())
    }

    /// Hand one processed block to the synchronizer.
    pub async fn process_block(&self, data: BlockData) -> Result<BlockOutcome> {
        let mut synchronizer = self.synchronizer.lock().await;
        let outcome = if data.block.height == 0 && synchronizer.last_committed().is_none() {
            synchronizer.genesis(data).await?
        } else {
            synchronizer.process_block(data).await?
        };
        Ok(outcome)
    }

    /// Rewind to `target` after a reorg.
    pub async fn rollback(&self, target: BlockRef) -> Result<()> {
        self.synchronizer.lock().await.rollback(target).await?;
        Ok(())
    }

    pub fn proxy(&self) -> Arc<RewardCalcProxy> {
        Arc::clone(&self.proxy)
    }

    pub async fn last_committed(&self) -> Option<BlockRef> {
        self.synchronizer.lock().await.last_committed()
    }

    /// Flushed records of the live data log.
    pub async fn live_records(&self) -> Result<Vec<(RecordKey, DataRecord)>> {
        Ok(self.synchronizer.lock().await.data_log().records()?)
    }

    /// Shutdown the node gracefully.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");
        if let Err(e) = self.proxy.close().await {
            error!("Failed to close reward calculator: {}", e);
        }

        // The handler exits once the event loop drops its sender.
        let cleanup = self.cleanup.lock().take();
        if let Some(task) = cleanup {
            if tokio::time::timeout(CLEANUP_DRAIN_TIMEOUT, task).await.is_err() {
                error!("Snapshot cleanup handler did not stop in time");
            }
        }
        info!("Shutdown complete");
    }
}

fn store_opener(backend: StorageBackend) -> Result<Arc<dyn StoreOpener>> {
    match backend {
        StorageBackend::File => Ok(Arc::new(FileStoreOpener)),
        #[cfg(feature = "rocksdb")]
        StorageBackend::RocksDb => Ok(Arc::new(qc_18_reward_calc::RocksDbOpener::default())),
        #[cfg(not(feature = "rocksdb"))]
        StorageBackend::RocksDb => anyhow::bail!("rocksdb backend is not compiled in"),
    }
}
