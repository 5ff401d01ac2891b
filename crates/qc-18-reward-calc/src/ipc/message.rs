//! # Message Types
//!
//! Every frame on the socket is `[kind, msg_id, payload]`. Requests flow from
//! the node to the engine; responses and notifications flow back.

use crate::domain::entities::*;
use crate::domain::errors::RewardCalcError;
use shared_types::{Address, BlockHeight, Hash};
use std::fmt;

/// Modulus at which message ids wrap.
pub const MSG_ID_MODULUS: u32 = 0xFFFF_FFFF;

/// Message kind codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Version,
    Calculate,
    Query,
    Claim,
    CommitBlock,
    CommitClaim,
    QueryCalculateStatus,
    QueryCalculateResult,
    Rollback,
    Init,
    Ready,
    CalculateDone,
    /// Internal send-loop sentinel. Never written to the wire.
    None,
}

impl MessageKind {
    pub const fn code(self) -> i64 {
        match self {
            Self::Version => 0,
            Self::Calculate => 1,
            Self::Query => 2,
            Self::Claim => 3,
            Self::CommitBlock => 4,
            Self::CommitClaim => 5,
            Self::QueryCalculateStatus => 6,
            Self::QueryCalculateResult => 7,
            Self::Rollback => 8,
            Self::Init => 9,
            Self::Ready => 10,
            Self::CalculateDone => 11,
            Self::None => -1,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, RewardCalcError> {
        Ok(match code {
            0 => Self::Version,
            1 => Self::Calculate,
            2 => Self::Query,
            3 => Self::Claim,
            4 => Self::CommitBlock,
            5 => Self::CommitClaim,
            6 => Self::QueryCalculateStatus,
            7 => Self::QueryCalculateResult,
            8 => Self::Rollback,
            9 => Self::Init,
            10 => Self::Ready,
            11 => Self::CalculateDone,
            -1 => Self::None,
            other => {
                return Err(RewardCalcError::protocol(format!(
                    "unknown message kind {}",
                    other
                )))
            }
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Version => "VERSION",
            Self::Calculate => "CALCULATE",
            Self::Query => "QUERY",
            Self::Claim => "CLAIM",
            Self::CommitBlock => "COMMIT_BLOCK",
            Self::CommitClaim => "COMMIT_CLAIM",
            Self::QueryCalculateStatus => "QUERY_CALCULATE_STATUS",
            Self::QueryCalculateResult => "QUERY_CALCULATE_RESULT",
            Self::Rollback => "ROLLBACK",
            Self::Init => "INIT",
            Self::Ready => "READY",
            Self::CalculateDone => "CALCULATE_DONE",
            Self::None => "NONE",
        }
    }

    /// Notifications are pushed by the engine and never awaited.
    pub const fn is_notification(self) -> bool {
        matches!(self, Self::Ready | Self::CalculateDone)
    }

    /// Whether a request of this kind expects a response.
    pub const fn expects_response(self) -> bool {
        !matches!(
            self,
            Self::CommitClaim | Self::None | Self::Ready | Self::CalculateDone
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A request from the node to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Version,
    Calculate {
        snapshot_path: String,
        block_height: BlockHeight,
    },
    Query {
        address: Address,
    },
    Claim(ClaimRef),
    CommitBlock {
        success: bool,
        block_height: BlockHeight,
        block_hash: Hash,
    },
    CommitClaim {
        success: bool,
        claim: ClaimRef,
    },
    QueryCalculateStatus,
    QueryCalculateResult {
        block_height: BlockHeight,
    },
    Rollback {
        block_height: BlockHeight,
        block_hash: Hash,
    },
    Init {
        block_height: BlockHeight,
    },
    /// Stops the send loop.
    None,
}

impl Request {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Version => MessageKind::Version,
            Self::Calculate { .. } => MessageKind::Calculate,
            Self::Query { .. } => MessageKind::Query,
            Self::Claim(_) => MessageKind::Claim,
            Self::CommitBlock { .. } => MessageKind::CommitBlock,
            Self::CommitClaim { .. } => MessageKind::CommitClaim,
            Self::QueryCalculateStatus => MessageKind::QueryCalculateStatus,
            Self::QueryCalculateResult { .. } => MessageKind::QueryCalculateResult,
            Self::Rollback { .. } => MessageKind::Rollback,
            Self::Init { .. } => MessageKind::Init,
            Self::None => MessageKind::None,
        }
    }
}

/// A response from the engine, matched to a request by `msg_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Version(VersionInfo),
    Calculate(CalculateAck),
    Query(IScoreInfo),
    Claim(ClaimResult),
    CommitBlock(BlockAck),
    QueryCalculateStatus(CalculateStatusReport),
    QueryCalculateResult(CalculateResultReport),
    Rollback(BlockAck),
    Init(InitAck),
}

impl Response {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Version(_) => MessageKind::Version,
            Self::Calculate(_) => MessageKind::Calculate,
            Self::Query(_) => MessageKind::Query,
            Self::Claim(_) => MessageKind::Claim,
            Self::CommitBlock(_) => MessageKind::CommitBlock,
            Self::QueryCalculateStatus(_) => MessageKind::QueryCalculateStatus,
            Self::QueryCalculateResult(_) => MessageKind::QueryCalculateResult,
            Self::Rollback(_) => MessageKind::Rollback,
            Self::Init(_) => MessageKind::Init,
        }
    }
}

/// An unsolicited message from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Ready(ReadyInfo),
    CalculateDone(CalculateDoneInfo),
}

impl Notification {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Ready(_) => MessageKind::Ready,
            Self::CalculateDone(_) => MessageKind::CalculateDone,
        }
    }
}

/// A frame carrying a message id and a typed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope<T> {
    pub msg_id: u32,
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn new(msg_id: u32, body: T) -> Self {
        Self { msg_id, body }
    }
}

/// Frame as sent by the node.
pub type OutgoingRequest = Envelope<Request>;

/// Frame as received by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingMessage {
    Response(Envelope<Response>),
    Notification(Envelope<Notification>),
}

impl IncomingMessage {
    pub fn response(msg_id: u32, response: Response) -> Self {
        Self::Response(Envelope::new(msg_id, response))
    }

    pub fn notification(notification: Notification) -> Self {
        Self::Notification(Envelope::new(0, notification))
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Response(env) => env.body.kind(),
            Self::Notification(env) => env.body.kind(),
        }
    }

    pub fn msg_id(&self) -> u32 {
        match self {
            Self::Response(env) => env.msg_id,
            Self::Notification(env) => env.msg_id,
        }
    }
}

/// Next id after `current`, wrapping at [`MSG_ID_MODULUS`].
pub fn next_msg_id(current: u32) -> u32 {
    ((current as u64 + 1) % MSG_ID_MODULUS as u64) as u32
}
