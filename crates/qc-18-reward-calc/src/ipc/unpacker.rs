//! # Message Unpacker
//!
//! Incremental decoder for the frame stream. The socket carries back-to-back
//! MessagePack values with no length prefix, so a read may end in the middle
//! of a frame; the tail is kept until the next `feed`.

use crate::domain::errors::RewardCalcError;
use crate::ipc::codec::{decode_incoming, decode_request};
use crate::ipc::message::{IncomingMessage, OutgoingRequest};
use rmpv::decode::Error as DecodeError;
use rmpv::Value;
use std::io::{Cursor, ErrorKind};
use std::marker::PhantomData;

/// A message type that can be decoded from one frame.
pub trait FrameDecode: Sized {
    fn decode_frame(value: Value) -> Result<Self, RewardCalcError>;
}

impl FrameDecode for IncomingMessage {
    fn decode_frame(value: Value) -> Result<Self, RewardCalcError> {
        decode_incoming(value)
    }
}

impl FrameDecode for OutgoingRequest {
    fn decode_frame(value: Value) -> Result<Self, RewardCalcError> {
        decode_request(value)
    }
}

/// Buffers raw bytes and yields decoded messages.
///
/// A malformed frame is fatal: the unpacker stops yielding and every later
/// call returns the same error. The stream is never resynchronised.
pub struct MessageUnpacker<M> {
    buf: Vec<u8>,
    failed: Option<RewardCalcError>,
    reported: bool,
    _marker: PhantomData<fn() -> M>,
}

/// Unpacker used by the node.
pub type IncomingUnpacker = MessageUnpacker<IncomingMessage>;

/// Unpacker used by a simulated engine.
pub type RequestUnpacker = MessageUnpacker<OutgoingRequest>;

impl<M: FrameDecode> Default for MessageUnpacker<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: FrameDecode> MessageUnpacker<M> {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(4096),
            failed: None,
            reported: false,
            _marker: PhantomData,
        }
    }

    /// Append raw bytes. Never blocks, never fails.
    pub fn feed(&mut self, data: &[u8]) {
        if self.failed.is_none() {
            self.buf.extend_from_slice(data);
        }
    }

    /// Bytes held for an incomplete trailing frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Decode the next complete frame, `Ok(None)` if more bytes are needed.
    pub fn next_message(&mut self) -> Result<Option<M>, RewardCalcError> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        if self.buf.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(self.buf.as_slice());
        let result = rmpv::decode::read_value(&mut cursor);
        let consumed = cursor.position() as usize;

        let decoded = match result {
            Ok(value) => {
                self.buf.drain(..consumed);
                M::decode_frame(value)
            }
            Err(e) if is_incomplete(&e) => return Ok(None),
            Err(e) => Err(RewardCalcError::protocol(format!(
                "malformed frame: {}",
                e
            ))),
        };

        decoded.map(Some).map_err(|e| {
            self.buf.clear();
            self.failed = Some(e.clone());
            e
        })
    }
}

impl<M: FrameDecode> Iterator for MessageUnpacker<M> {
    type Item = Result<M, RewardCalcError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_message() {
            Ok(Some(message)) => Some(Ok(message)),
            Ok(None) => None,
            // Report the failure once, then stop iterating.
            Err(_) if self.reported => None,
            Err(e) => {
                self.reported = true;
                Some(Err(e))
            }
        }
    }
}

fn is_incomplete(err: &DecodeError) -> bool {
    match err {
        DecodeError::InvalidMarkerRead(io) | DecodeError::InvalidDataRead(io) => {
            io.kind() == ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}
