//! # Socket Transport
//!
//! One duplex Unix-socket connection driven by two tasks:
//!
//! - **send loop**: drains the bounded outbound queue and writes encoded
//!   frames. Stops on `Request::None` or a write failure, then closes the
//!   write half.
//! - **receive loop**: reads bytes, feeds the unpacker and forwards decoded
//!   messages. Stops on a zero-length read or a decode failure, then pushes
//!   `Request::None` so the send loop unwinds too.

use crate::domain::errors::RewardCalcError;
use crate::ipc::codec::encode_request;
use crate::ipc::message::{Envelope, IncomingMessage, OutgoingRequest, Request};
use crate::ipc::unpacker::IncomingUnpacker;
use quantum_telemetry::RC_REQUESTS_SENT;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Decoded message or the error that ended the receive loop.
pub type InboundItem = Result<IncomingMessage, RewardCalcError>;

/// Handles to a live connection.
pub struct Transport {
    /// Frames to write, in order.
    pub outbound: mpsc::Sender<OutgoingRequest>,
    /// Frames read, in arrival order. Closes when the receive loop ends.
    pub inbound: mpsc::Receiver<InboundItem>,
    send_task: JoinHandle<()>,
    recv_task: JoinHandle<()>,
}

impl Transport {
    /// Split `stream` and start both loops.
    pub fn spawn(stream: UnixStream, capacity: usize) -> Self {
        let (reader, writer) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);

        let send_task = tokio::spawn(send_loop(writer, outbound_rx));
        let recv_task = tokio::spawn(recv_loop(reader, inbound_tx, outbound_tx.clone()));

        Self {
            outbound: outbound_tx,
            inbound: inbound_rx,
            send_task,
            recv_task,
        }
    }

    /// Stop both loops. Frames already queued ahead of the sentinel are
    /// still written.
    pub fn close(self) {
        let _ = self.outbound.try_send(Envelope::new(0, Request::None));
        self.recv_task.abort();
        drop(self.outbound);
        drop(self.send_task);
    }
}

async fn send_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<OutgoingRequest>) {
    while let Some(frame) = rx.recv().await {
        if frame.body == Request::None {
            debug!("[qc-18] Send loop received NONE");
            break;
        }
        let kind = frame.body.kind();
        let bytes = match encode_request(&frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(msg_id = frame.msg_id, kind = %kind, error = %e, "[qc-18] Encode failed");
                continue;
            }
        };
        if let Err(e) = writer.write_all(&bytes).await {
            warn!(msg_id = frame.msg_id, kind = %kind, error = %e, "[qc-18] Socket write failed");
            break;
        }
        RC_REQUESTS_SENT.with_label_values(&[kind.name()]).inc();
    }
    let _ = writer.shutdown().await;
    debug!("[qc-18] Send loop stopped");
}

async fn recv_loop(
    mut reader: OwnedReadHalf,
    inbound: mpsc::Sender<InboundItem>,
    outbound: mpsc::Sender<OutgoingRequest>,
) {
    let mut unpacker = IncomingUnpacker::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    'read: loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("[qc-18] Engine closed the connection");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "[qc-18] Socket read failed");
                break;
            }
        };
        unpacker.feed(&buf[..n]);
        for item in unpacker.by_ref() {
            let fatal = item.is_err();
            if let Err(e) = &item {
                error!(error = %e, "[qc-18] Closing connection on undecodable frame");
            }
            if inbound.send(item).await.is_err() || fatal {
                break 'read;
            }
        }
    }

    let _ = outbound.try_send(Envelope::new(0, Request::None));
    debug!("[qc-18] Receive loop stopped");
}
