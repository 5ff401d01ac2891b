//! # Value Objects
//!
//! Status codes carried on the wire and the engine liveness state.

use crate::domain::errors::RewardCalcError;
use std::fmt;

/// Answer to a CALCULATE request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalculateStatus {
    /// The engine started the calculation.
    Accepted,
    /// The engine could not start the calculation.
    Failure,
    /// Another calculation is still running.
    AlreadyRunning,
}

impl CalculateStatus {
    pub const fn code(self) -> i64 {
        match self {
            Self::Accepted => 0,
            Self::Failure => 1,
            Self::AlreadyRunning => 2,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, RewardCalcError> {
        match code {
            0 => Ok(Self::Accepted),
            1 => Ok(Self::Failure),
            2 => Ok(Self::AlreadyRunning),
            other => Err(RewardCalcError::protocol(format!(
                "unknown calculate status code {}",
                other
            ))),
        }
    }
}

/// Progress of a calculation as reported by status and result queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalculationProgress {
    Done,
    Failure,
    InProgress,
}

impl CalculationProgress {
    pub const fn code(self) -> i64 {
        match self {
            Self::Done => 0,
            Self::Failure => 1,
            Self::InProgress => 2,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, RewardCalcError> {
        match code {
            0 => Ok(Self::Done),
            1 => Ok(Self::Failure),
            2 => Ok(Self::InProgress),
            other => Err(RewardCalcError::protocol(format!(
                "unknown calculation progress code {}",
                other
            ))),
        }
    }
}

/// Whether the engine has announced itself on the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EngineLiveness {
    #[default]
    NotReady,
    Ready,
}

impl EngineLiveness {
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

impl fmt::Display for EngineLiveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "NOT_READY"),
            Self::Ready => write!(f, "READY"),
        }
    }
}
