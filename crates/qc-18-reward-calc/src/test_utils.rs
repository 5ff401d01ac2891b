//! Test doubles: a simulated engine that speaks the socket protocol, a
//! launcher that starts it, and a notification handler that records calls.

use crate::domain::entities::*;
use crate::domain::errors::RewardCalcError;
use crate::domain::value_objects::{CalculateStatus, CalculationProgress};
use crate::ipc::codec::encode_incoming;
use crate::ipc::message::*;
use crate::ipc::unpacker::RequestUnpacker;
use crate::ports::outbound::{EngineHandle, EngineLaunchSpec, EngineLauncher, NotificationHandler};
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::{BlockHeight, U256};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

// =============================================================================
// NOTIFICATION HANDLER
// =============================================================================

/// Records every notification it receives.
#[derive(Default)]
pub struct RecordingHandler {
    ready: Mutex<Vec<ReadyInfo>>,
    calculate_done: Mutex<Vec<CalculateDoneInfo>>,
    notify: Notify,
}

impl RecordingHandler {
    pub fn ready_count(&self) -> usize {
        self.ready.lock().len()
    }

    pub fn calculate_done_count(&self) -> usize {
        self.calculate_done.lock().len()
    }

    pub fn last_ready(&self) -> Option<ReadyInfo> {
        self.ready.lock().last().copied()
    }

    pub fn last_calculate_done(&self) -> Option<CalculateDoneInfo> {
        self.calculate_done.lock().last().cloned()
    }

    /// Total notifications seen.
    pub fn total(&self) -> usize {
        self.ready_count() + self.calculate_done_count()
    }

    /// Wait until at least `count` notifications were recorded.
    pub async fn wait_for_total(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.total() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

impl NotificationHandler for RecordingHandler {
    fn on_ready(&self, info: &ReadyInfo) {
        self.ready.lock().push(*info);
        self.notify.notify_waiters();
    }

    fn on_calculate_done(&self, info: &CalculateDoneInfo) {
        self.calculate_done.lock().push(info.clone());
        self.notify.notify_waiters();
    }
}

// =============================================================================
// SIMULATED ENGINE
// =============================================================================

/// Behaviour of an auto-responding [`MockEngine`].
#[derive(Debug, Clone)]
pub struct MockEngineConfig {
    /// Height announced in READY.
    pub ready_block_height: BlockHeight,
    /// Answer requests. When false the engine reads but never replies.
    pub respond: bool,
    /// Push CALCULATE_DONE after accepting a CALCULATE.
    pub emit_calculate_done: bool,
    /// I-Score reported for queries, claims and calculations.
    pub iscore: U256,
}

impl Default for MockEngineConfig {
    fn default() -> Self {
        Self {
            ready_block_height: 0,
            respond: true,
            emit_calculate_done: true,
            iscore: U256::from(1_000u64),
        }
    }
}

/// Engine side of the socket.
pub struct MockEngine {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    unpacker: RequestUnpacker,
}

impl MockEngine {
    /// Connect to a listening node, retrying briefly while the socket appears.
    pub async fn connect(path: &Path) -> io::Result<Self> {
        let mut attempts = 0;
        let stream = loop {
            match UnixStream::connect(path).await {
                Ok(stream) => break stream,
                Err(e) if attempts >= 50 => return Err(e),
                Err(_) => {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        };
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader,
            writer,
            unpacker: RequestUnpacker::new(),
        })
    }

    /// Connect and announce READY at `block_height`.
    pub async fn connect_ready(path: &Path, block_height: BlockHeight) -> io::Result<Self> {
        let mut engine = Self::connect(path).await?;
        engine.send_ready(block_height).await?;
        Ok(engine)
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes).await
    }

    async fn send(&mut self, message: &IncomingMessage) -> io::Result<()> {
        let bytes = encode_incoming(message)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        self.send_raw(&bytes).await
    }

    pub async fn send_ready(&mut self, block_height: BlockHeight) -> io::Result<()> {
        self.send_notification(Notification::Ready(ReadyInfo {
            version: 1,
            block_height,
            block_hash: [0u8; 32],
        }))
        .await
    }

    pub async fn send_notification(&mut self, notification: Notification) -> io::Result<()> {
        self.send(&IncomingMessage::notification(notification)).await
    }

    pub async fn respond(&mut self, msg_id: u32, response: Response) -> io::Result<()> {
        self.send(&IncomingMessage::response(msg_id, response)).await
    }

    /// Next decoded request, `None` once the node closes its write half.
    pub async fn next_request(&mut self) -> Option<OutgoingRequest> {
        let mut buf = [0u8; 4096];
        loop {
            match self.unpacker.next_message() {
                Ok(Some(frame)) => return Some(frame),
                Ok(None) => {}
                Err(_) => return None,
            }
            match self.reader.read(&mut buf).await {
                Ok(0) | Err(_) => return None,
                Ok(n) => self.unpacker.feed(&buf[..n]),
            }
        }
    }

    /// Like [`next_request`](Self::next_request) but panics after `timeout`.
    pub async fn expect_request(&mut self, timeout: Duration) -> OutgoingRequest {
        tokio::time::timeout(timeout, self.next_request())
            .await
            .expect("timed out waiting for request")
            .expect("connection closed while waiting for request")
    }

    /// Answer requests on a new task. See [`run_responder`](Self::run_responder).
    pub fn serve(self, config: MockEngineConfig, log: Arc<Mutex<Vec<Request>>>) -> JoinHandle<()> {
        tokio::spawn(self.run_responder(config, log))
    }

    /// Answer requests until the node disconnects, recording each one.
    pub async fn run_responder(mut self, config: MockEngineConfig, log: Arc<Mutex<Vec<Request>>>) {
        while let Some(frame) = self.next_request().await {
            log.lock().push(frame.body.clone());
            if !config.respond {
                continue;
            }
            if let Some(response) = default_response(&frame.body, &config) {
                if self.respond(frame.msg_id, response).await.is_err() {
                    break;
                }
            }
            if let Request::Calculate { block_height, .. } = frame.body {
                if config.emit_calculate_done {
                    let done = Notification::CalculateDone(CalculateDoneInfo {
                        success: true,
                        block_height,
                        iscore: config.iscore,
                        state_hash: vec![0xaa; 32],
                    });
                    if self.send_notification(done).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Canned success response for `request`.
pub fn default_response(request: &Request, config: &MockEngineConfig) -> Option<Response> {
    let response = match request {
        Request::Version => Response::Version(VersionInfo {
            version: 1,
            block_height: config.ready_block_height,
        }),
        Request::Calculate { block_height, .. } => Response::Calculate(CalculateAck {
            status: CalculateStatus::Accepted,
            block_height: *block_height,
        }),
        Request::Query { address } => Response::Query(IScoreInfo {
            address: *address,
            iscore: config.iscore,
            block_height: config.ready_block_height,
        }),
        Request::Claim(claim) => Response::Claim(ClaimResult {
            claim: *claim,
            iscore: config.iscore,
        }),
        Request::CommitBlock {
            success,
            block_height,
            block_hash,
        } => Response::CommitBlock(BlockAck {
            success: *success,
            block_height: *block_height,
            block_hash: *block_hash,
        }),
        Request::QueryCalculateStatus => Response::QueryCalculateStatus(CalculateStatusReport {
            status: CalculationProgress::Done,
            block_height: config.ready_block_height,
        }),
        Request::QueryCalculateResult { block_height } => {
            Response::QueryCalculateResult(CalculateResultReport {
                status: CalculationProgress::Done,
                block_height: *block_height,
                iscore: config.iscore,
                state_hash: vec![0xaa; 32],
            })
        }
        Request::Rollback {
            block_height,
            block_hash,
        } => Response::Rollback(BlockAck {
            success: true,
            block_height: *block_height,
            block_hash: *block_hash,
        }),
        Request::Init { block_height } => Response::Init(InitAck {
            success: true,
            block_height: *block_height,
        }),
        Request::CommitClaim { .. } | Request::None => return None,
    };
    Some(response)
}

// =============================================================================
// LAUNCHER
// =============================================================================

/// Launcher that starts an in-process [`MockEngine`] instead of a binary.
#[derive(Clone, Default)]
pub struct MockLauncher {
    pub config: MockEngineConfig,
    pub requests: Arc<Mutex<Vec<Request>>>,
    launches: Arc<AtomicUsize>,
    last_spec: Arc<Mutex<Option<EngineLaunchSpec>>>,
}

impl MockLauncher {
    pub fn new(config: MockEngineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn last_spec(&self) -> Option<EngineLaunchSpec> {
        self.last_spec.lock().clone()
    }

    /// Kinds of every request the engine has seen, in arrival order.
    pub fn request_kinds(&self) -> Vec<MessageKind> {
        self.requests.lock().iter().map(Request::kind).collect()
    }
}

struct MockEngineHandle {
    task: JoinHandle<()>,
}

#[async_trait]
impl EngineHandle for MockEngineHandle {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn terminate(&mut self) -> Result<(), RewardCalcError> {
        self.task.abort();
        Ok(())
    }
}

#[async_trait]
impl EngineLauncher for MockLauncher {
    async fn launch(&self, spec: &EngineLaunchSpec) -> Result<Box<dyn EngineHandle>, RewardCalcError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        *self.last_spec.lock() = Some(spec.clone());

        let socket: PathBuf = spec.socket_path.clone();
        let config = self.config.clone();
        let log = self.requests.clone();
        let task = tokio::spawn(async move {
            let Ok(engine) = MockEngine::connect_ready(&socket, config.ready_block_height).await
            else {
                return;
            };
            engine.run_responder(config, log).await;
        });
        Ok(Box::new(MockEngineHandle { task }))
    }
}
