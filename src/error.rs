//! Stable error taxonomy surfaced to callers of the core.
//!
//! Internal component errors ([`CurveError`], [`SlotAssignError`]) carry the
//! mechanical detail; they are mapped into [`CoreError`] at the handler
//! boundary rather than leaking their variants to callers.

use thiserror::Error;

/// Curve-level failures from [`crate::curve`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CurveError {
    #[error("point is not a valid compressed G1 encoding")]
    InvalidG1Encoding,
    #[error("point is not a valid compressed G2 encoding")]
    InvalidG2Encoding,
    #[error("hash-to-curve exhausted all {0} retry attempts without finding a valid point")]
    HashToCurveExhausted(u32),
}

/// Slot-assignment failures from [`crate::slots`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SlotAssignError {
    #[error("total participant weight must be positive")]
    ZeroTotalWeight,
    #[error("participant {0} was assigned a non-positive slot count")]
    NonPositiveShare(usize),
    #[error("no participants to assign slots to")]
    NoParticipants,
}

/// Stable, caller-facing error codes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl From<CurveError> for CoreError {
    fn from(e: CurveError) -> Self {
        match e {
            CurveError::InvalidG1Encoding | CurveError::InvalidG2Encoding => {
                CoreError::InvalidArgument(e.to_string())
            }
            CurveError::HashToCurveExhausted(_) => CoreError::Internal(e.to_string()),
        }
    }
}

impl From<SlotAssignError> for CoreError {
    fn from(e: SlotAssignError) -> Self {
        CoreError::InvalidArgument(e.to_string())
    }
}
