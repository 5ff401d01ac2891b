//! # IPC Event Loop
//!
//! A single task that owns the [`CorrelationQueue`] and the outbound side of
//! the current connection. Application tasks reach it through an
//! [`IpcHandle`] over two bounded lanes:
//!
//! - **invoke**: calculate, claim, commit, rollback, init, version
//! - **query**: I-Score queries, so a slow invoke call never blocks them
//!
//! The node listens on the socket path and the engine connects as a client.
//! When the connection drops, every pending call fails with
//! `ConnectionClosed` and the loop waits for the next connection.

use crate::domain::errors::RewardCalcError;
use crate::domain::value_objects::EngineLiveness;
use crate::ipc::message::{Envelope, MessageKind, Request};
use crate::ipc::queue::{CallResult, CompletionHandle, CorrelationQueue};
use crate::ipc::transport::Transport;
use crate::ports::outbound::NotificationHandler;
use quantum_telemetry::RC_REQUEST_TIMEOUTS;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Which lane a command travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Invoke,
    Query,
}

/// Result of handing a request to the event loop.
#[derive(Debug)]
pub struct Submitted {
    pub msg_id: u32,
    /// `None` for fire-and-forget kinds.
    pub completion: Option<CompletionHandle>,
}

/// Point-in-time view of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub pending: usize,
    pub liveness: EngineLiveness,
}

pub(crate) enum IpcCommand {
    Submit {
        request: Request,
        reply: oneshot::Sender<Result<Submitted, RewardCalcError>>,
    },
    Cancel {
        msg_id: u32,
    },
    Inspect {
        msg_id: Option<u32>,
        reply: oneshot::Sender<(QueueSnapshot, bool)>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

enum Flow {
    Continue,
    Stop(Option<oneshot::Sender<()>>),
}

/// Owner of the listener, the queue and the current connection.
pub struct IpcEventLoop {
    listener: UnixListener,
    socket_path: PathBuf,
    queue: CorrelationQueue,
    invoke_rx: mpsc::Receiver<IpcCommand>,
    query_rx: mpsc::Receiver<IpcCommand>,
    capacity: usize,
}

impl IpcEventLoop {
    /// Bind the socket, removing a stale socket file first.
    ///
    /// Must be called within a Tokio runtime.
    pub fn bind(
        socket_path: &Path,
        capacity: usize,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<(Self, IpcHandle), RewardCalcError> {
        if socket_path.exists() {
            warn!(path = %socket_path.display(), "[qc-18] Removing stale socket file");
            std::fs::remove_file(socket_path)?;
        }
        if let Some(parent) = socket_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let listener = UnixListener::bind(socket_path)?;

        let capacity = capacity.max(1);
        let queue = CorrelationQueue::new(handler);
        let liveness = queue.subscribe();
        let (invoke_tx, invoke_rx) = mpsc::channel(capacity);
        let (query_tx, query_rx) = mpsc::channel(capacity);

        let event_loop = Self {
            listener,
            socket_path: socket_path.to_path_buf(),
            queue,
            invoke_rx,
            query_rx,
            capacity,
        };
        let handle = IpcHandle {
            invoke: invoke_tx,
            query: query_tx,
            liveness,
        };
        Ok((event_loop, handle))
    }

    /// Run until shut down or until every [`IpcHandle`] is dropped.
    pub async fn run(mut self) {
        info!(path = %self.socket_path.display(), "[qc-18] IPC listening");

        loop {
            let stream = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        error!(error = %e, "[qc-18] Accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
                cmd = self.invoke_rx.recv() => match self.on_command(cmd, None).await {
                    Flow::Continue => continue,
                    Flow::Stop(done) => return finish(done),
                },
                cmd = self.query_rx.recv() => match self.on_command(cmd, None).await {
                    Flow::Continue => continue,
                    Flow::Stop(done) => return finish(done),
                },
            };

            info!("[qc-18] Engine connected");
            let mut transport = Transport::spawn(stream, self.capacity);

            let (flow, reason) = loop {
                tokio::select! {
                    incoming = transport.inbound.recv() => match incoming {
                        Some(Ok(message)) => {
                            if let Err(e) = self.queue.on_incoming(message) {
                                error!(error = %e, "[qc-18] Protocol violation, closing connection");
                                break (Flow::Continue, e);
                            }
                        }
                        Some(Err(e)) => break (Flow::Continue, e),
                        None => break (Flow::Continue, RewardCalcError::ConnectionClosed),
                    },
                    cmd = self.invoke_rx.recv() => {
                        if let Flow::Stop(done) = self.on_command(cmd, Some(&transport)).await {
                            break (Flow::Stop(done), RewardCalcError::ConnectionClosed);
                        }
                    },
                    cmd = self.query_rx.recv() => {
                        if let Flow::Stop(done) = self.on_command(cmd, Some(&transport)).await {
                            break (Flow::Stop(done), RewardCalcError::ConnectionClosed);
                        }
                    },
                }
            };

            transport.close();
            self.queue.fail_all(reason);
            info!("[qc-18] Engine disconnected");

            if let Flow::Stop(done) = flow {
                return finish(done);
            }
        }
    }

    async fn on_command(&mut self, cmd: Option<IpcCommand>, transport: Option<&Transport>) -> Flow {
        let Some(cmd) = cmd else {
            debug!("[qc-18] All IPC handles dropped");
            return Flow::Stop(None);
        };

        match cmd {
            IpcCommand::Submit { request, reply } => {
                let result = match transport {
                    Some(transport) => self.submit(request, transport).await,
                    None => Err(RewardCalcError::EngineNotReady),
                };
                let _ = reply.send(result);
            }
            IpcCommand::Cancel { msg_id } => {
                self.queue.cancel(msg_id);
            }
            IpcCommand::Inspect { msg_id, reply } => {
                let snapshot = QueueSnapshot {
                    pending: self.queue.pending_count(),
                    liveness: self.queue.liveness(),
                };
                let contains = msg_id.is_some_and(|id| self.queue.contains(id));
                let _ = reply.send((snapshot, contains));
            }
            IpcCommand::Shutdown { done } => {
                if let Some(transport) = transport {
                    let _ = transport.outbound.send(Envelope::new(0, Request::None)).await;
                }
                return Flow::Stop(Some(done));
            }
        }
        Flow::Continue
    }

    async fn submit(
        &mut self,
        request: Request,
        transport: &Transport,
    ) -> Result<Submitted, RewardCalcError> {
        let (frame, completion) = self.queue.enqueue_send(request)?;
        let msg_id = frame.msg_id;
        if transport.outbound.send(frame).await.is_err() {
            self.queue.cancel(msg_id);
            return Err(RewardCalcError::ConnectionClosed);
        }
        Ok(Submitted { msg_id, completion })
    }
}

fn finish(done: Option<oneshot::Sender<()>>) {
    info!("[qc-18] IPC event loop stopped");
    if let Some(done) = done {
        let _ = done.send(());
    }
}

/// Cloneable front door to the event loop.
#[derive(Clone)]
pub struct IpcHandle {
    invoke: mpsc::Sender<IpcCommand>,
    query: mpsc::Sender<IpcCommand>,
    liveness: watch::Receiver<EngineLiveness>,
}

impl IpcHandle {
    fn lane(&self, lane: Lane) -> &mpsc::Sender<IpcCommand> {
        match lane {
            Lane::Invoke => &self.invoke,
            Lane::Query => &self.query,
        }
    }

    /// Submit `request` and wait for its response.
    ///
    /// On expiry the pending call is cancelled on the same lane and
    /// `Timeout` is returned without waiting for lane capacity.
    pub async fn call(&self, lane: Lane, request: Request, timeout: Duration) -> CallResult {
        let kind = request.kind();
        let deadline = Instant::now() + timeout;

        let submitted = match tokio::time::timeout_at(deadline, self.submit(lane, request)).await {
            Ok(result) => result?,
            Err(_) => return Err(self.timed_out(kind, timeout)),
        };
        let Some(completion) = submitted.completion else {
            return Err(RewardCalcError::protocol(format!(
                "{} does not expect a response",
                kind
            )));
        };

        match tokio::time::timeout_at(deadline, completion).await {
            Ok(result) => result,
            Err(_) => {
                self.cancel(lane, submitted.msg_id);
                Err(self.timed_out(kind, timeout))
            }
        }
    }

    /// Queue a cancellation for `msg_id` without waiting for lane capacity.
    ///
    /// A full lane hands the command to a detached task that delivers it
    /// once the loop drains the lane.
    fn cancel(&self, lane: Lane, msg_id: u32) {
        match self.lane(lane).try_send(IpcCommand::Cancel { msg_id }) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(command)) => {
                debug!(msg_id, ?lane, "[qc-18] Lane full, deferring cancellation");
                let sender = self.lane(lane).clone();
                tokio::spawn(async move {
                    let _ = sender.send(command).await;
                });
            }
        }
    }

    /// Hand `request` to the event loop without waiting for a response.
    pub async fn submit(&self, lane: Lane, request: Request) -> Result<Submitted, RewardCalcError> {
        let (reply, rx) = oneshot::channel();
        self.lane(lane)
            .send(IpcCommand::Submit { request, reply })
            .await
            .map_err(|_| RewardCalcError::ConnectionClosed)?;
        rx.await.map_err(|_| RewardCalcError::ConnectionClosed)?
    }

    fn timed_out(&self, kind: MessageKind, timeout: Duration) -> RewardCalcError {
        RC_REQUEST_TIMEOUTS.with_label_values(&[kind.name()]).inc();
        warn!(kind = %kind, timeout_ms = timeout.as_millis() as u64, "[qc-18] Call timed out");
        RewardCalcError::Timeout {
            operation: kind.name(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    async fn inspect(&self, msg_id: Option<u32>) -> Result<(QueueSnapshot, bool), RewardCalcError> {
        let (reply, rx) = oneshot::channel();
        self.invoke
            .send(IpcCommand::Inspect { msg_id, reply })
            .await
            .map_err(|_| RewardCalcError::ConnectionClosed)?;
        rx.await.map_err(|_| RewardCalcError::ConnectionClosed)
    }

    /// Number of calls awaiting a response.
    pub async fn pending_count(&self) -> Result<usize, RewardCalcError> {
        Ok(self.inspect(None).await?.0.pending)
    }

    /// Whether `msg_id` still has a pending call.
    pub async fn contains(&self, msg_id: u32) -> Result<bool, RewardCalcError> {
        Ok(self.inspect(Some(msg_id)).await?.1)
    }

    pub fn liveness(&self) -> EngineLiveness {
        *self.liveness.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.liveness().is_ready()
    }

    /// Wait for READY, failing with `Timeout` after `timeout`.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<(), RewardCalcError> {
        let mut rx = self.liveness.clone();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|l| l.is_ready()))
            .await
            .map(|ready| ready.map(|_| ()));
        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(RewardCalcError::ConnectionClosed),
            Err(_) => Err(RewardCalcError::Timeout {
                operation: MessageKind::Ready.name(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Send NONE down the current connection and stop the loop.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.invoke.send(IpcCommand::Shutdown { done }).await.is_ok() {
            let _ = rx.await;
        }
    }
}
