//! Error types and error codes for ddlock
//!
//! This module defines:
//! - `LockError`: the caller-visible error taxonomy of the object lock manager
//! - `ErrorCode`: structured error codes carried in lock responses

use serde::{Deserialize, Serialize};

/// Errors reported by the object lock manager.
///
/// Every terminal outcome of an acquire or release maps to exactly one of these
/// (or to success), so the calling layer can decide between retrying against a
/// new leader, retrying the same operation, or giving up.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("leader epoch {requested} is stale (current: {current})")]
    EpochStale { requested: String, current: String },

    #[error("lock conflict on object {object}: held by '{holder}' in {held_mode} mode on member {member}")]
    LockConflict {
        object: String,
        holder: String,
        held_mode: String,
        member: String,
    },

    #[error("lock propagation timed out, unacknowledged members: [{}]", .pending.join(", "))]
    PropagationTimeout { pending: Vec<String> },

    #[error("member {member} rejected lock update: {reason}")]
    MemberPermanentFailure { member: String, reason: String },
}

impl LockError {
    /// Structured error code for responses
    pub fn error_code(&self) -> ErrorCode<'static> {
        match self {
            LockError::InvalidArgument(_) => PARAMETER_VALIDATE_ERROR,
            LockError::EpochStale { .. } => EPOCH_STALE,
            LockError::LockConflict { .. } => LOCK_CONFLICT,
            LockError::PropagationTimeout { .. } => PROPAGATION_TIMEOUT,
            LockError::MemberPermanentFailure { .. } => MEMBER_PERMANENT_FAILURE,
        }
    }

    /// Whether the caller may retry the same logical operation against the same leader.
    ///
    /// Acquire re-grants are idempotent for the same owner and mode, and releases are
    /// always idempotent, so an ambiguous propagation timeout is safe to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::PropagationTimeout { .. })
    }

    /// Whether the caller must rediscover the leader before retrying
    pub fn requires_leader_refresh(&self) -> bool {
        matches!(self, LockError::EpochStale { .. })
    }
}

/// Error code structure for API responses
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCode<'a> {
    pub code: i32,
    pub message: &'a str,
}

pub const SUCCESS: ErrorCode<'static> = ErrorCode {
    code: 0,
    message: "success",
};

pub const PARAMETER_VALIDATE_ERROR: ErrorCode<'static> = ErrorCode {
    code: 20002,
    message: "parameter validate error",
};

// Object lock errors
pub const EPOCH_STALE: ErrorCode<'static> = ErrorCode {
    code: 30001,
    message: "leader epoch is stale",
};

pub const LOCK_CONFLICT: ErrorCode<'static> = ErrorCode {
    code: 30002,
    message: "object lock conflict",
};

pub const PROPAGATION_TIMEOUT: ErrorCode<'static> = ErrorCode {
    code: 30003,
    message: "lock propagation timeout",
};

pub const MEMBER_PERMANENT_FAILURE: ErrorCode<'static> = ErrorCode {
    code: 30004,
    message: "member rejected lock update",
};
