//! # Correlation Queue
//!
//! Matches responses to outstanding requests by `msg_id`, routes
//! notifications to the [`NotificationHandler`] and tracks engine liveness.
//!
//! Owned by the IPC event loop, which is its only writer, so no locking is
//! needed. Liveness is published through a `watch` channel.
//!
//! Flow:
//! 1. The event loop calls `enqueue_send()` and writes the returned frame
//! 2. The caller awaits the [`CompletionHandle`] with a timeout
//! 3. The receive path calls `on_incoming()`, which completes the handle
//! 4. On timeout the caller asks the event loop to `cancel()` the id

use crate::domain::errors::RewardCalcError;
use crate::domain::value_objects::EngineLiveness;
use crate::ipc::message::*;
use crate::ports::outbound::NotificationHandler;
use quantum_telemetry::{
    RC_CALL_DURATION, RC_NOTIFICATIONS, RC_PENDING_CALLS, RC_RESPONSES_RECEIVED,
    RC_UNMATCHED_RESPONSES,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

/// Outcome delivered to a waiting caller.
pub type CallResult = Result<Response, RewardCalcError>;

struct PendingCall {
    kind: MessageKind,
    sender: oneshot::Sender<CallResult>,
    sent_at: Instant,
}

/// Resolves when the response for `msg_id` arrives.
///
/// Resolves to `ConnectionClosed` if the pending call is dropped without an
/// answer.
#[derive(Debug)]
pub struct CompletionHandle {
    msg_id: u32,
    kind: MessageKind,
    rx: oneshot::Receiver<CallResult>,
}

impl CompletionHandle {
    pub fn msg_id(&self) -> u32 {
        self.msg_id
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }
}

impl Future for CompletionHandle {
    type Output = CallResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RewardCalcError::ConnectionClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Pending call table plus liveness state.
pub struct CorrelationQueue {
    pending: HashMap<u32, PendingCall>,
    last_msg_id: u32,
    liveness: watch::Sender<EngineLiveness>,
    handler: Arc<dyn NotificationHandler>,
}

impl CorrelationQueue {
    pub fn new(handler: Arc<dyn NotificationHandler>) -> Self {
        let (liveness, _) = watch::channel(EngineLiveness::NotReady);
        Self {
            pending: HashMap::new(),
            last_msg_id: 0,
            liveness,
            handler,
        }
    }

    /// Receiver that observes every liveness transition.
    pub fn subscribe(&self) -> watch::Receiver<EngineLiveness> {
        self.liveness.subscribe()
    }

    pub fn liveness(&self) -> EngineLiveness {
        *self.liveness.borrow()
    }

    /// Record a pending call under an explicit id.
    pub fn register(
        &mut self,
        msg_id: u32,
        kind: MessageKind,
    ) -> Result<CompletionHandle, RewardCalcError> {
        if self.pending.contains_key(&msg_id) {
            return Err(RewardCalcError::DuplicateMsgId(msg_id));
        }
        let (sender, rx) = oneshot::channel();
        self.pending.insert(
            msg_id,
            PendingCall {
                kind,
                sender,
                sent_at: Instant::now(),
            },
        );
        RC_PENDING_CALLS.set(self.pending.len() as f64);
        Ok(CompletionHandle { msg_id, kind, rx })
    }

    /// Allocate an id for `request`, record a pending call if the kind
    /// expects a response, and return the frame to write.
    ///
    /// Fails with `EngineNotReady` before anything is recorded when the engine
    /// has not announced READY.
    pub fn enqueue_send(
        &mut self,
        request: Request,
    ) -> Result<(OutgoingRequest, Option<CompletionHandle>), RewardCalcError> {
        if !self.liveness().is_ready() {
            return Err(RewardCalcError::EngineNotReady);
        }
        let kind = request.kind();
        let msg_id = self.next_free_msg_id()?;
        let handle = if kind.expects_response() {
            Some(self.register(msg_id, kind)?)
        } else {
            None
        };
        self.last_msg_id = msg_id;
        debug!(msg_id, kind = %kind, "[qc-18] Request queued");
        Ok((Envelope::new(msg_id, request), handle))
    }

    /// First id after the last allocated one that no pending call holds.
    fn next_free_msg_id(&self) -> Result<u32, RewardCalcError> {
        let mut msg_id = next_msg_id(self.last_msg_id);
        for _ in 0..self.pending.len() {
            if !self.pending.contains_key(&msg_id) {
                break;
            }
            debug!(msg_id, "[qc-18] Message id still in flight, skipping");
            msg_id = next_msg_id(msg_id);
        }
        if self.pending.contains_key(&msg_id) {
            return Err(RewardCalcError::DuplicateMsgId(msg_id));
        }
        Ok(msg_id)
    }

    /// Dispatch one decoded incoming message.
    ///
    /// Only a READY notification is accepted while NOT_READY; anything else
    /// is a protocol violation reported as `EngineNotReady`. Responses with
    /// no pending call are discarded with a warning.
    pub fn on_incoming(&mut self, message: IncomingMessage) -> Result<(), RewardCalcError> {
        let kind = message.kind();
        if !self.liveness().is_ready() && kind != MessageKind::Ready {
            warn!(kind = %kind, "[qc-18] Message received before READY");
            return Err(RewardCalcError::EngineNotReady);
        }

        match message {
            IncomingMessage::Notification(env) => {
                RC_NOTIFICATIONS.with_label_values(&[kind.name()]).inc();
                match env.body {
                    Notification::Ready(info) => {
                        info!(
                            version = info.version,
                            block_height = info.block_height,
                            "[qc-18] Engine READY"
                        );
                        self.liveness.send_replace(EngineLiveness::Ready);
                        self.handler.on_ready(&info);
                    }
                    Notification::CalculateDone(info) => {
                        self.handler.on_calculate_done(&info);
                    }
                }
            }
            IncomingMessage::Response(env) => {
                let Some(call) = self.pending.remove(&env.msg_id) else {
                    RC_UNMATCHED_RESPONSES.inc();
                    warn!(
                        msg_id = env.msg_id,
                        kind = %kind,
                        "[qc-18] Response for unknown or expired msg_id"
                    );
                    return Ok(());
                };
                RC_PENDING_CALLS.set(self.pending.len() as f64);
                RC_RESPONSES_RECEIVED.with_label_values(&[kind.name()]).inc();
                RC_CALL_DURATION
                    .with_label_values(&[call.kind.name()])
                    .observe(call.sent_at.elapsed().as_secs_f64());

                let result = if call.kind == kind {
                    Ok(env.body)
                } else {
                    Err(RewardCalcError::protocol(format!(
                        "{} answered with {}",
                        call.kind, kind
                    )))
                };
                if call.sender.send(result).is_err() {
                    debug!(msg_id = env.msg_id, "[qc-18] Caller dropped before completion");
                }
            }
        }
        Ok(())
    }

    /// Drop the pending call for `msg_id`. Returns whether one existed.
    pub fn cancel(&mut self, msg_id: u32) -> bool {
        let removed = self.pending.remove(&msg_id).is_some();
        if removed {
            RC_PENDING_CALLS.set(self.pending.len() as f64);
            debug!(msg_id, "[qc-18] Pending call cancelled");
        }
        removed
    }

    pub fn contains(&self, msg_id: u32) -> bool {
        self.pending.contains_key(&msg_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Complete every pending call with `error` and return to NOT_READY.
    pub fn fail_all(&mut self, error: RewardCalcError) {
        let count = self.pending.len();
        self.liveness.send_replace(EngineLiveness::NotReady);
        for (_, call) in self.pending.drain() {
            let _ = call.sender.send(Err(error.clone()));
        }
        RC_PENDING_CALLS.set(0.0);
        if count > 0 {
            warn!(count, error = %error, "[qc-18] Failed all pending calls");
        }
    }
}

#[cfg(test)]
mod tests;
