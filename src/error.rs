use thiserror::Error;

use crate::address::Address;

/// Errors raised by the controller, codec, store and reward engine.
///
/// A stale oracle chunk is not an error: it comes back as
/// [`ChunkOutcome::Stale`](crate::engine::ChunkOutcome::Stale) so a batch
/// keeps progressing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RewardError {
    // ========================================================================
    // Admin writes
    // ========================================================================
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("unauthorized caller {0}")]
    Unauthorized(Address),

    // ========================================================================
    // Payload shape and content
    // ========================================================================
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("type {0} not present in payload")]
    UnknownType(u16),

    #[error("invalid scale for chain {0}")]
    InvalidScale(u64),

    // ========================================================================
    // Runtime gates
    // ========================================================================
    #[error("oracle updates are frozen")]
    Frozen,

    #[error("time went backwards: last update at {last}, now {now}")]
    NonMonotonicTime { last: u64, now: u64 },

    #[error("fixed-point overflow")]
    Overflow,

    #[error("division by zero")]
    DivisionByZero,
}

pub type Result<T> = std::result::Result<T, RewardError>;
