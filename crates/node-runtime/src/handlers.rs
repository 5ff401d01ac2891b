//! # Engine Notification Handlers
//!
//! READY and CALCULATE_DONE arrive on the IPC event loop, which must not
//! block. [`ChannelNotificationHandler`] forwards them into a bounded channel
//! and [`SnapshotCleanupHandler`] consumes them on its own task, deleting the
//! sealed snapshot of every successfully finished calculation.

use qc_18_reward_calc::service::remove_snapshot_in;
use qc_18_reward_calc::{CalculateDoneInfo, NotificationHandler, ReadyInfo};
use quantum_telemetry::RC_SNAPSHOTS_REMOVED;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Notification forwarded off the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Ready(ReadyInfo),
    CalculateDone(CalculateDoneInfo),
}

/// Forwards notifications into a channel without blocking.
pub struct ChannelNotificationHandler {
    sender: mpsc::Sender<EngineEvent>,
}

impl ChannelNotificationHandler {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    fn forward(&self, event: EngineEvent) {
        if let Err(e) = self.sender.try_send(event) {
            // A dropped CALCULATE_DONE only leaves a snapshot on disk.
            warn!("[qc-18] Notification dropped: {}", e);
        }
    }
}

impl NotificationHandler for ChannelNotificationHandler {
    fn on_ready(&self, info: &ReadyInfo) {
        self.forward(EngineEvent::Ready(*info));
    }

    fn on_calculate_done(&self, info: &CalculateDoneInfo) {
        self.forward(EngineEvent::CalculateDone(info.clone()));
    }
}

/// Removes sealed snapshots once the engine is done with them.
pub struct SnapshotCleanupHandler {
    receiver: mpsc::Receiver<EngineEvent>,
    data_root: PathBuf,
}

impl SnapshotCleanupHandler {
    pub fn new(receiver: mpsc::Receiver<EngineEvent>, data_root: PathBuf) -> Self {
        Self {
            receiver,
            data_root,
        }
    }

    /// Run until every sender is gone.
    pub async fn run(mut self) {
        info!("[qc-18] Snapshot cleanup handler started");
        while let Some(event) = self.receiver.recv().await {
            self.handle(event);
        }
        debug!("[qc-18] Snapshot cleanup handler stopped");
    }

    fn handle(&self, event: EngineEvent) {
        match event {
            EngineEvent::Ready(info) => {
                info!(
                    version = info.version,
                    block_height = info.block_height,
                    "[qc-18] Reward calculator ready"
                );
            }
            EngineEvent::CalculateDone(info) if !info.success => {
                warn!(
                    block_height = info.block_height,
                    "[qc-18] Calculation failed, keeping snapshot"
                );
            }
            EngineEvent::CalculateDone(info) => {
                match remove_snapshot_in(&self.data_root, info.block_height) {
                    Ok(true) => {
                        RC_SNAPSHOTS_REMOVED.inc();
                        info!(
                            block_height = info.block_height,
                            iscore = %info.iscore,
                            state_hash = %hex::encode(&info.state_hash),
                            "[qc-18] Calculation done, snapshot removed"
                        );
                    }
                    Ok(false) => {
                        debug!(
                            block_height = info.block_height,
                            "[qc-18] Calculation done, no snapshot to remove"
                        );
                    }
                    Err(e) => {
                        error!(
                            block_height = info.block_height,
                            "[qc-18] Snapshot removal failed: {}", e
                        );
                    }
                }
            }
        }
    }
}
