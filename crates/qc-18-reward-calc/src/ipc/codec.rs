//! # Wire Codec
//!
//! MessagePack encoding of `[kind, msg_id, payload]` frames.
//!
//! Decoding is direction-aware: the node decodes responses and notifications
//! ([`decode_incoming`]), a simulated engine decodes requests
//! ([`decode_request`]). Addresses travel as 21-byte binaries, hashes as
//! binaries and big integers as minimal signed big-endian binaries.

use crate::domain::entities::*;
use crate::domain::errors::RewardCalcError;
use crate::domain::value_objects::{CalculateStatus, CalculationProgress};
use crate::ipc::message::*;
use rmpv::Value;
use shared_types::{u256_from_bytes, u256_to_bytes, Address, Hash, U256};

// =============================================================================
// ENCODING
// =============================================================================

/// Encode a request frame. `Request::None` has no wire form.
pub fn encode_request(envelope: &OutgoingRequest) -> Result<Vec<u8>, RewardCalcError> {
    let kind = envelope.body.kind();
    if kind == MessageKind::None {
        return Err(RewardCalcError::protocol("NONE is never written to the wire"));
    }
    write_frame(kind, envelope.msg_id, request_payload(&envelope.body))
}

/// Encode a response or notification frame.
pub fn encode_incoming(message: &IncomingMessage) -> Result<Vec<u8>, RewardCalcError> {
    let payload = match message {
        IncomingMessage::Response(env) => response_payload(&env.body),
        IncomingMessage::Notification(env) => notification_payload(&env.body),
    };
    write_frame(message.kind(), message.msg_id(), payload)
}

fn write_frame(kind: MessageKind, msg_id: u32, payload: Value) -> Result<Vec<u8>, RewardCalcError> {
    let frame = Value::Array(vec![Value::from(kind.code()), Value::from(msg_id), payload]);
    let mut buf = Vec::with_capacity(64);
    rmpv::encode::write_value(&mut buf, &frame)
        .map_err(|e| RewardCalcError::protocol(format!("encode {} failed: {}", kind, e)))?;
    Ok(buf)
}

fn address_value(address: &Address) -> Value {
    Value::Binary(address.to_bytes_including_prefix().to_vec())
}

fn hash_value(hash: &Hash) -> Value {
    Value::Binary(hash.to_vec())
}

fn int_value(value: &U256) -> Value {
    Value::Binary(u256_to_bytes(value))
}

fn claim_values(claim: &ClaimRef) -> Vec<Value> {
    vec![
        address_value(&claim.address),
        Value::from(claim.block_height),
        hash_value(&claim.block_hash),
        Value::from(claim.tx_index),
        hash_value(&claim.tx_hash),
    ]
}

fn request_payload(request: &Request) -> Value {
    match request {
        Request::Version | Request::QueryCalculateStatus | Request::None => Value::Nil,
        Request::Calculate {
            snapshot_path,
            block_height,
        } => Value::Array(vec![
            Value::from(snapshot_path.as_str()),
            Value::from(*block_height),
        ]),
        Request::Query { address } => Value::Array(vec![address_value(address)]),
        Request::Claim(claim) => Value::Array(claim_values(claim)),
        Request::CommitBlock {
            success,
            block_height,
            block_hash,
        } => Value::Array(vec![
            Value::from(*success),
            Value::from(*block_height),
            hash_value(block_hash),
        ]),
        Request::CommitClaim { success, claim } => {
            let mut values = vec![Value::from(*success)];
            values.extend(claim_values(claim));
            Value::Array(values)
        }
        Request::QueryCalculateResult { block_height } => {
            Value::Array(vec![Value::from(*block_height)])
        }
        Request::Rollback {
            block_height,
            block_hash,
        } => Value::Array(vec![Value::from(*block_height), hash_value(block_hash)]),
        Request::Init { block_height } => Value::Array(vec![Value::from(*block_height)]),
    }
}

fn block_ack_values(ack: &BlockAck) -> Value {
    Value::Array(vec![
        Value::from(ack.success),
        Value::from(ack.block_height),
        hash_value(&ack.block_hash),
    ])
}

fn response_payload(response: &Response) -> Value {
    match response {
        Response::Version(v) => {
            Value::Array(vec![Value::from(v.version), Value::from(v.block_height)])
        }
        Response::Calculate(ack) => Value::Array(vec![
            Value::from(ack.status.code()),
            Value::from(ack.block_height),
        ]),
        Response::Query(info) => Value::Array(vec![
            address_value(&info.address),
            int_value(&info.iscore),
            Value::from(info.block_height),
        ]),
        Response::Claim(result) => {
            let mut values = claim_values(&result.claim);
            values.push(int_value(&result.iscore));
            Value::Array(values)
        }
        Response::CommitBlock(ack) | Response::Rollback(ack) => block_ack_values(ack),
        Response::QueryCalculateStatus(report) => Value::Array(vec![
            Value::from(report.status.code()),
            Value::from(report.block_height),
        ]),
        Response::QueryCalculateResult(report) => Value::Array(vec![
            Value::from(report.status.code()),
            Value::from(report.block_height),
            int_value(&report.iscore),
            Value::Binary(report.state_hash.clone()),
        ]),
        Response::Init(ack) => {
            Value::Array(vec![Value::from(ack.success), Value::from(ack.block_height)])
        }
    }
}

fn notification_payload(notification: &Notification) -> Value {
    match notification {
        Notification::Ready(info) => Value::Array(vec![
            Value::from(info.version),
            Value::from(info.block_height),
            hash_value(&info.block_hash),
        ]),
        Notification::CalculateDone(info) => Value::Array(vec![
            Value::from(info.success),
            Value::from(info.block_height),
            int_value(&info.iscore),
            Value::Binary(info.state_hash.clone()),
        ]),
    }
}

// =============================================================================
// DECODING
// =============================================================================

/// Split a frame into kind, msg_id and payload.
fn split_frame(value: Value) -> Result<(MessageKind, u32, Value), RewardCalcError> {
    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(RewardCalcError::protocol(format!(
                "frame is not an array: {}",
                other
            )))
        }
    };
    if items.len() != 3 {
        return Err(RewardCalcError::protocol(format!(
            "frame has {} elements, expected 3",
            items.len()
        )));
    }
    let mut items = items.into_iter();
    let kind_code = items
        .next()
        .and_then(|v| v.as_i64())
        .ok_or_else(|| RewardCalcError::protocol("frame kind is not an integer"))?;
    let kind = MessageKind::from_code(kind_code)?;
    let msg_id = items
        .next()
        .and_then(|v| v.as_u64())
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| RewardCalcError::protocol("frame msg_id is not a u32"))?;
    let payload = items.next().unwrap_or(Value::Nil);
    Ok((kind, msg_id, payload))
}

/// Decode a frame received by the node.
pub fn decode_incoming(value: Value) -> Result<IncomingMessage, RewardCalcError> {
    let (kind, msg_id, payload) = split_frame(value)?;
    let mut f = Fields::new(kind, &payload)?;

    let message = match kind {
        MessageKind::Version => IncomingMessage::response(
            msg_id,
            Response::Version(VersionInfo {
                version: f.u32("version")?,
                block_height: f.u64("block_height")?,
            }),
        ),
        MessageKind::Calculate => IncomingMessage::response(
            msg_id,
            Response::Calculate(CalculateAck {
                status: CalculateStatus::from_code(f.i64("status")?)?,
                block_height: f.u64("block_height")?,
            }),
        ),
        MessageKind::Query => IncomingMessage::response(
            msg_id,
            Response::Query(IScoreInfo {
                address: f.address("address")?,
                iscore: f.u256("iscore")?,
                block_height: f.u64("block_height")?,
            }),
        ),
        MessageKind::Claim => {
            let claim = f.claim()?;
            IncomingMessage::response(
                msg_id,
                Response::Claim(ClaimResult {
                    claim,
                    iscore: f.u256("iscore")?,
                }),
            )
        }
        MessageKind::CommitBlock => {
            IncomingMessage::response(msg_id, Response::CommitBlock(f.block_ack()?))
        }
        MessageKind::QueryCalculateStatus => IncomingMessage::response(
            msg_id,
            Response::QueryCalculateStatus(CalculateStatusReport {
                status: CalculationProgress::from_code(f.i64("status")?)?,
                block_height: f.u64("block_height")?,
            }),
        ),
        MessageKind::QueryCalculateResult => IncomingMessage::response(
            msg_id,
            Response::QueryCalculateResult(CalculateResultReport {
                status: CalculationProgress::from_code(f.i64("status")?)?,
                block_height: f.u64("block_height")?,
                iscore: f.u256("iscore")?,
                state_hash: f.bytes("state_hash")?,
            }),
        ),
        MessageKind::Rollback => IncomingMessage::response(msg_id, Response::Rollback(f.block_ack()?)),
        MessageKind::Init => IncomingMessage::response(
            msg_id,
            Response::Init(InitAck {
                success: f.bool("success")?,
                block_height: f.u64("block_height")?,
            }),
        ),
        MessageKind::Ready => IncomingMessage::Notification(Envelope::new(
            msg_id,
            Notification::Ready(ReadyInfo {
                version: f.u32("version")?,
                block_height: f.u64("block_height")?,
                block_hash: f.hash("block_hash")?,
            }),
        )),
        MessageKind::CalculateDone => IncomingMessage::Notification(Envelope::new(
            msg_id,
            Notification::CalculateDone(CalculateDoneInfo {
                success: f.bool("success")?,
                block_height: f.u64("block_height")?,
                iscore: f.u256("iscore")?,
                state_hash: f.bytes("state_hash")?,
            }),
        )),
        MessageKind::CommitClaim | MessageKind::None => {
            return Err(RewardCalcError::protocol(format!(
                "{} is never sent by the engine",
                kind
            )))
        }
    };
    Ok(message)
}

/// Decode a frame received by the engine.
pub fn decode_request(value: Value) -> Result<OutgoingRequest, RewardCalcError> {
    let (kind, msg_id, payload) = split_frame(value)?;
    let mut f = Fields::new(kind, &payload)?;

    let request = match kind {
        MessageKind::Version => Request::Version,
        MessageKind::Calculate => Request::Calculate {
            snapshot_path: f.string("snapshot_path")?,
            block_height: f.u64("block_height")?,
        },
        MessageKind::Query => Request::Query {
            address: f.address("address")?,
        },
        MessageKind::Claim => Request::Claim(f.claim()?),
        MessageKind::CommitBlock => Request::CommitBlock {
            success: f.bool("success")?,
            block_height: f.u64("block_height")?,
            block_hash: f.hash("block_hash")?,
        },
        MessageKind::CommitClaim => Request::CommitClaim {
            success: f.bool("success")?,
            claim: f.claim()?,
        },
        MessageKind::QueryCalculateStatus => Request::QueryCalculateStatus,
        MessageKind::QueryCalculateResult => Request::QueryCalculateResult {
            block_height: f.u64("block_height")?,
        },
        MessageKind::Rollback => Request::Rollback {
            block_height: f.u64("block_height")?,
            block_hash: f.hash("block_hash")?,
        },
        MessageKind::Init => Request::Init {
            block_height: f.u64("block_height")?,
        },
        MessageKind::Ready | MessageKind::CalculateDone | MessageKind::None => {
            return Err(RewardCalcError::protocol(format!(
                "{} is never sent by the node",
                kind
            )))
        }
    };
    Ok(Envelope::new(msg_id, request))
}

/// Positional reader over a payload array.
struct Fields<'a> {
    kind: MessageKind,
    items: std::slice::Iter<'a, Value>,
}

impl<'a> Fields<'a> {
    fn new(kind: MessageKind, payload: &'a Value) -> Result<Self, RewardCalcError> {
        const EMPTY: &[Value] = &[];
        let items = match payload {
            Value::Nil => EMPTY.iter(),
            Value::Array(items) => items.iter(),
            other => {
                return Err(RewardCalcError::protocol(format!(
                    "{} payload is not an array: {}",
                    kind, other
                )))
            }
        };
        Ok(Self { kind, items })
    }

    fn err(&self, field: &str, expected: &str) -> RewardCalcError {
        RewardCalcError::protocol(format!(
            "{}.{}: expected {}",
            self.kind, field, expected
        ))
    }

    fn next(&mut self, field: &str) -> Result<&'a Value, RewardCalcError> {
        let kind = self.kind;
        self.items
            .next()
            .ok_or_else(|| RewardCalcError::protocol(format!("{}.{}: missing", kind, field)))
    }

    fn i64(&mut self, field: &str) -> Result<i64, RewardCalcError> {
        let v = self.next(field)?;
        v.as_i64().ok_or_else(|| self.err(field, "integer"))
    }

    fn u64(&mut self, field: &str) -> Result<u64, RewardCalcError> {
        let v = self.next(field)?;
        v.as_u64().ok_or_else(|| self.err(field, "unsigned integer"))
    }

    fn u32(&mut self, field: &str) -> Result<u32, RewardCalcError> {
        let v = self.u64(field)?;
        u32::try_from(v).map_err(|_| self.err(field, "u32"))
    }

    fn bool(&mut self, field: &str) -> Result<bool, RewardCalcError> {
        let v = self.next(field)?;
        v.as_bool().ok_or_else(|| self.err(field, "boolean"))
    }

    fn bytes(&mut self, field: &str) -> Result<Vec<u8>, RewardCalcError> {
        let v = self.next(field)?;
        if v.is_nil() {
            return Ok(Vec::new());
        }
        v.as_slice()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| self.err(field, "binary"))
    }

    fn string(&mut self, field: &str) -> Result<String, RewardCalcError> {
        let v = self.next(field)?;
        v.as_str()
            .map(str::to_string)
            .ok_or_else(|| self.err(field, "utf-8 string"))
    }

    fn hash(&mut self, field: &str) -> Result<Hash, RewardCalcError> {
        let bytes = self.bytes(field)?;
        Hash::try_from(bytes.as_slice()).map_err(|_| self.err(field, "32-byte hash"))
    }

    fn address(&mut self, field: &str) -> Result<Address, RewardCalcError> {
        let bytes = self.bytes(field)?;
        Address::from_bytes_including_prefix(&bytes)
            .map_err(|e| RewardCalcError::protocol(format!("{}.{}: {}", self.kind, field, e)))
    }

    fn u256(&mut self, field: &str) -> Result<U256, RewardCalcError> {
        let bytes = self.bytes(field)?;
        u256_from_bytes(&bytes)
            .map_err(|e| RewardCalcError::protocol(format!("{}.{}: {}", self.kind, field, e)))
    }

    fn claim(&mut self) -> Result<ClaimRef, RewardCalcError> {
        Ok(ClaimRef {
            address: self.address("address")?,
            block_height: self.u64("block_height")?,
            block_hash: self.hash("block_hash")?,
            tx_index: self.u32("tx_index")?,
            tx_hash: self.hash("tx_hash")?,
        })
    }

    fn block_ack(&mut self) -> Result<BlockAck, RewardCalcError> {
        Ok(BlockAck {
            success: self.bool("success")?,
            block_height: self.u64("block_height")?,
            block_hash: self.hash("block_hash")?,
        })
    }
}

#[cfg(test)]
mod tests;
