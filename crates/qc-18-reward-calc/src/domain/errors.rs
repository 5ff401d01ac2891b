//! # Domain Errors
//!
//! Error types for the Reward Calculator subsystem.

use thiserror::Error;

/// Reward calculator error types.
///
/// `Clone` so one failure (e.g. a lost connection) can complete every
/// outstanding call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewardCalcError {
    /// Malformed frame, unknown kind or unknown status code.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The engine has not announced READY on the current connection.
    #[error("Reward calculator is not ready")]
    EngineNotReady,

    /// No response within the call timeout.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Request kind that timed out
        operation: &'static str,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// An ordering or filesystem precondition was violated.
    #[error("Structural invariant violated: {0}")]
    StructuralInvariant(String),

    /// The connection to the engine was lost before the call completed.
    #[error("Connection to reward calculator closed")]
    ConnectionClosed,

    /// A second request was registered under an in-flight id.
    #[error("Duplicate in-flight msg_id: {0}")]
    DuplicateMsgId(u32),

    /// The engine answered but refused the operation.
    #[error("{operation} rejected at height {block_height}")]
    Rejected {
        /// Request kind that was rejected
        operation: &'static str,
        /// Height echoed by the engine
        block_height: u64,
    },

    /// Launching or stopping the engine process failed.
    #[error("Engine process error: {0}")]
    Process(String),

    /// Data log or metadata store failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Socket level I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl RewardCalcError {
    /// Shorthand for a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Shorthand for a structural invariant violation.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::StructuralInvariant(message.into())
    }

    /// Label used for the `error_type` metric dimension.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::EngineNotReady => "not_ready",
            Self::Timeout { .. } => "timeout",
            Self::StructuralInvariant(_) => "invariant",
            Self::ConnectionClosed => "connection_closed",
            Self::DuplicateMsgId(_) => "duplicate_msg_id",
            Self::Rejected { .. } => "rejected",
            Self::Process(_) => "process",
            Self::Storage(_) => "storage",
            Self::Io(_) => "io",
        }
    }
}

impl From<std::io::Error> for RewardCalcError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Key-value store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KVStoreError {
    /// I/O error during read/write.
    #[error("KV store I/O error: {message}")]
    IOError { message: String },

    /// Data corruption in the store.
    #[error("KV store corruption: {message}")]
    CorruptionError { message: String },
}

impl KVStoreError {
    pub fn io(err: impl std::fmt::Display) -> Self {
        Self::IOError {
            message: err.to_string(),
        }
    }
}

impl From<KVStoreError> for RewardCalcError {
    fn from(err: KVStoreError) -> Self {
        Self::Storage(err.to_string())
    }
}
