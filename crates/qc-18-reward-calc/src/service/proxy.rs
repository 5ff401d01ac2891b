//! # Reward Calculator Proxy
//!
//! Public face of the subsystem. Owns the engine process and the IPC event
//! loop, and turns each operation into one request awaited with a timeout.
//!
//! ## Lifecycle
//!
//! 1. `new()` binds the socket and starts the event loop
//! 2. `start()` launches the engine, which connects and sends READY
//! 3. operations succeed once READY has been seen
//! 4. `close()` sends NONE, kills the engine and removes the socket file

use crate::domain::config::RewardCalcConfig;
use crate::domain::entities::*;
use crate::domain::errors::RewardCalcError;
use crate::domain::value_objects::{CalculateStatus, EngineLiveness};
use crate::ipc::event_loop::{IpcEventLoop, IpcHandle, Lane};
use crate::ipc::message::{MessageKind, Request, Response};
use crate::ports::inbound::RewardCalcApi;
use crate::ports::outbound::{EngineHandle, EngineLauncher, NotificationHandler};
use async_trait::async_trait;
use parking_lot::Mutex;
use quantum_telemetry::{RC_BLOCKS_COMMITTED, RC_LAST_COMMITTED_HEIGHT, SUBSYSTEM_ERRORS};
use shared_types::{Address, BlockHeight, BlockRef, Hash};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SUBSYSTEM_ID: &str = "18";

/// Clears the rollback flag when the rollback call finishes, however it ends.
struct RollbackGuard<'a>(&'a AtomicBool);

impl Drop for RollbackGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn unexpected(expected: MessageKind, response: &Response) -> RewardCalcError {
    RewardCalcError::protocol(format!("expected {} response, got {}", expected, response.kind()))
}

fn record_error(err: &RewardCalcError) {
    SUBSYSTEM_ERRORS
        .with_label_values(&[SUBSYSTEM_ID, err.label()])
        .inc();
}

pub struct RewardCalcProxy {
    config: RewardCalcConfig,
    ipc: IpcHandle,
    launcher: Arc<dyn EngineLauncher>,
    engine: tokio::sync::Mutex<Option<Box<dyn EngineHandle>>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    last_commit_point: Mutex<Option<BlockRef>>,
    rollback_in_flight: AtomicBool,
}

impl RewardCalcProxy {
    /// Bind the socket and start the IPC event loop. The engine is not
    /// started until [`start`](Self::start).
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(
        config: RewardCalcConfig,
        handler: Arc<dyn NotificationHandler>,
        launcher: Arc<dyn EngineLauncher>,
    ) -> Result<Self, RewardCalcError> {
        let (event_loop, ipc) =
            IpcEventLoop::bind(&config.socket_path, config.lane_capacity, handler)?;
        let task = tokio::spawn(event_loop.run());

        Ok(Self {
            config,
            ipc,
            launcher,
            engine: tokio::sync::Mutex::new(None),
            event_loop: Mutex::new(Some(task)),
            last_commit_point: Mutex::new(None),
            rollback_in_flight: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &RewardCalcConfig {
        &self.config
    }

    /// Launch the engine. Does nothing if it is already running.
    pub async fn start(&self) -> Result<(), RewardCalcError> {
        let mut engine = self.engine.lock().await;
        if engine.is_some() {
            debug!("[qc-18] Engine already started");
            return Ok(());
        }
        let handle = self
            .launcher
            .launch(&self.config.launch_spec())
            .await
            .inspect_err(record_error)?;
        info!(pid = handle.id(), "[qc-18] Reward calculator launched");
        *engine = Some(handle);
        Ok(())
    }

    /// Whether [`start`](Self::start) launched an engine that has not been
    /// stopped since.
    pub async fn is_started(&self) -> bool {
        self.engine.lock().await.is_some()
    }

    /// Kill the engine process. Pending calls fail once its socket closes.
    pub async fn stop(&self) -> Result<(), RewardCalcError> {
        if let Some(mut handle) = self.engine.lock().await.take() {
            handle.terminate().await?;
        }
        Ok(())
    }

    /// Stop the event loop (sending NONE), kill the engine and remove the
    /// socket file.
    pub async fn close(&self) -> Result<(), RewardCalcError> {
        self.ipc.shutdown().await;
        let task = self.event_loop.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.stop().await?;

        let socket = &self.config.socket_path;
        if socket.exists() {
            std::fs::remove_file(socket)?;
        }
        info!("[qc-18] Reward calculator proxy closed");
        Ok(())
    }

    pub fn liveness(&self) -> EngineLiveness {
        self.ipc.liveness()
    }

    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<(), RewardCalcError> {
        self.ipc.wait_until_ready(timeout).await
    }

    /// Calls awaiting a response.
    pub async fn pending_count(&self) -> Result<usize, RewardCalcError> {
        self.ipc.pending_count().await
    }

    /// Last block the engine acknowledged through COMMIT_BLOCK or ROLLBACK.
    pub fn last_commit_point(&self) -> Option<BlockRef> {
        *self.last_commit_point.lock()
    }

    pub fn is_rollback_in_flight(&self) -> bool {
        self.rollback_in_flight.load(Ordering::SeqCst)
    }

    fn refuse_during_rollback(&self, operation: MessageKind) -> Result<(), RewardCalcError> {
        if self.is_rollback_in_flight() {
            warn!(kind = %operation, "[qc-18] Refused while rollback is in flight");
            return Err(RewardCalcError::invariant(format!(
                "{} refused while rollback is in flight",
                operation
            )));
        }
        Ok(())
    }

    async fn call(
        &self,
        lane: Lane,
        request: Request,
        timeout: Duration,
    ) -> Result<Response, RewardCalcError> {
        self.ipc
            .call(lane, request, timeout)
            .await
            .inspect_err(record_error)
    }

    async fn invoke(&self, request: Request) -> Result<Response, RewardCalcError> {
        self.call(Lane::Invoke, request, self.config.ipc_timeout).await
    }

    /// CALCULATE with an explicit timeout instead of the configured one.
    pub async fn calculate_with_timeout(
        &self,
        snapshot_path: &Path,
        block_height: BlockHeight,
        timeout: Duration,
    ) -> Result<CalculateAck, RewardCalcError> {
        self.refuse_during_rollback(MessageKind::Calculate)?;
        let request = Request::Calculate {
            snapshot_path: snapshot_path.to_string_lossy().into_owned(),
            block_height,
        };
        let ack = match self.call(Lane::Invoke, request, timeout).await? {
            Response::Calculate(ack) => ack,
            other => return Err(unexpected(MessageKind::Calculate, &other)),
        };
        if ack.status == CalculateStatus::Failure {
            return Err(RewardCalcError::Rejected {
                operation: MessageKind::Calculate.name(),
                block_height,
            });
        }
        info!(block_height, status = ?ack.status, "[qc-18] Calculation requested");
        Ok(ack)
    }
}

#[async_trait]
impl RewardCalcApi for RewardCalcProxy {
    async fn get_version(&self) -> Result<VersionInfo, RewardCalcError> {
        match self.invoke(Request::Version).await? {
            Response::Version(info) => Ok(info),
            other => Err(unexpected(MessageKind::Version, &other)),
        }
    }

    async fn calculate(
        &self,
        snapshot_path: &Path,
        block_height: BlockHeight,
    ) -> Result<CalculateAck, RewardCalcError> {
        self.calculate_with_timeout(snapshot_path, block_height, self.config.ipc_timeout)
            .await
    }

    async fn claim_iscore(&self, claim: ClaimRef) -> Result<ClaimResult, RewardCalcError> {
        match self.invoke(Request::Claim(claim)).await? {
            Response::Claim(result) => Ok(result),
            other => Err(unexpected(MessageKind::Claim, &other)),
        }
    }

    async fn commit_claim(&self, success: bool, claim: ClaimRef) -> Result<(), RewardCalcError> {
        let submitted = self
            .ipc
            .submit(Lane::Invoke, Request::CommitClaim { success, claim })
            .await
            .inspect_err(record_error)?;
        debug!(msg_id = submitted.msg_id, success, "[qc-18] Claim committed");
        Ok(())
    }

    async fn query_iscore(&self, address: Address) -> Result<IScoreInfo, RewardCalcError> {
        let request = Request::Query { address };
        match self
            .call(Lane::Query, request, self.config.ipc_timeout)
            .await?
        {
            Response::Query(info) => Ok(info),
            other => Err(unexpected(MessageKind::Query, &other)),
        }
    }

    async fn query_calculate_status(&self) -> Result<CalculateStatusReport, RewardCalcError> {
        match self.invoke(Request::QueryCalculateStatus).await? {
            Response::QueryCalculateStatus(report) => Ok(report),
            other => Err(unexpected(MessageKind::QueryCalculateStatus, &other)),
        }
    }

    async fn query_calculate_result(
        &self,
        block_height: BlockHeight,
    ) -> Result<CalculateResultReport, RewardCalcError> {
        match self
            .invoke(Request::QueryCalculateResult { block_height })
            .await?
        {
            Response::QueryCalculateResult(report) => Ok(report),
            other => Err(unexpected(MessageKind::QueryCalculateResult, &other)),
        }
    }

    async fn commit_block(
        &self,
        success: bool,
        block_height: BlockHeight,
        block_hash: Hash,
    ) -> Result<BlockAck, RewardCalcError> {
        self.refuse_during_rollback(MessageKind::CommitBlock)?;
        let request = Request::CommitBlock {
            success,
            block_height,
            block_hash,
        };
        let ack = match self.invoke(request).await? {
            Response::CommitBlock(ack) => ack,
            other => return Err(unexpected(MessageKind::CommitBlock, &other)),
        };
        if success && !ack.success {
            return Err(RewardCalcError::Rejected {
                operation: MessageKind::CommitBlock.name(),
                block_height,
            });
        }
        if success {
            *self.last_commit_point.lock() = Some(BlockRef::new(block_height, block_hash));
            RC_BLOCKS_COMMITTED.inc();
            RC_LAST_COMMITTED_HEIGHT.set(block_height as f64);
        }
        debug!(block_height, success, "[qc-18] Block commit acknowledged");
        Ok(ack)
    }

    async fn init_reward_calculator(
        &self,
        block_height: BlockHeight,
    ) -> Result<InitAck, RewardCalcError> {
        let ack = match self.invoke(Request::Init { block_height }).await? {
            Response::Init(ack) => ack,
            other => return Err(unexpected(MessageKind::Init, &other)),
        };
        if !ack.success {
            return Err(RewardCalcError::Rejected {
                operation: MessageKind::Init.name(),
                block_height,
            });
        }
        info!(block_height, "[qc-18] Reward calculator initialised");
        Ok(ack)
    }

    async fn rollback(
        &self,
        block_height: BlockHeight,
        block_hash: Hash,
    ) -> Result<BlockAck, RewardCalcError> {
        if self
            .rollback_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RewardCalcError::invariant("rollback already in flight"));
        }
        let _guard = RollbackGuard(&self.rollback_in_flight);

        let request = Request::Rollback {
            block_height,
            block_hash,
        };
        let ack = match self.invoke(request).await? {
            Response::Rollback(ack) => ack,
            other => return Err(unexpected(MessageKind::Rollback, &other)),
        };
        if !ack.success {
            return Err(RewardCalcError::Rejected {
                operation: MessageKind::Rollback.name(),
                block_height,
            });
        }
        *self.last_commit_point.lock() = Some(BlockRef::new(block_height, block_hash));
        RC_LAST_COMMITTED_HEIGHT.set(block_height as f64);
        info!(block_height, "[qc-18] Reward calculator rolled back");
        Ok(ack)
    }

    fn is_ready(&self) -> bool {
        self.ipc.is_ready()
    }
}
