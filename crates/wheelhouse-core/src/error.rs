//! Error types for the arbitration core.
//!
//! All arbitration errors are local and non-fatal: a rejected request leaves
//! queue and turn state untouched. The driver reports them to the sender and
//! keeps going. Configuration errors are separate because they only occur at
//! startup.

use std::time::Duration;

use thiserror::Error;
use wheelhouse_proto::{ErrorPayload, SessionId};

/// Errors returned by queue, scheduler, relay and admin operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArbiterError {
    /// Operation reserved for the current holder
    #[error("session {session_id} does not hold control")]
    NotHolder {
        /// Session that attempted the operation
        session_id: SessionId,
        /// Current holder, if any
        holder: Option<SessionId>,
    },

    /// Time value outside the configured bounds
    #[error("{value}s is outside [{min}s, {max}s]")]
    OutOfRange {
        /// Rejected value in seconds
        value: i64,
        /// Lower bound in seconds
        min: u32,
        /// Upper bound in seconds
        max: u32,
    },

    /// Session is not in the queue
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// Holder stopped sending heartbeats
    #[error("session {session_id} silent for {elapsed:?}")]
    StaleConnection {
        /// Silent session
        session_id: SessionId,
        /// Time since its last heartbeat
        elapsed: Duration,
    },

    /// Move target outside the queue
    #[error("position {position} is outside a queue of {len}")]
    InvalidPosition {
        /// Requested position
        position: usize,
        /// Queue length
        len: usize,
    },
}

impl ArbiterError {
    /// Wire error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotHolder { .. } => ErrorPayload::NOT_HOLDER,
            Self::OutOfRange { .. } => ErrorPayload::OUT_OF_RANGE,
            Self::NotFound(_) | Self::StaleConnection { .. } => ErrorPayload::NOT_FOUND,
            Self::InvalidPosition { .. } => ErrorPayload::INVALID_POSITION,
        }
    }

    /// Wire error payload for this error.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload::new(self.code(), self.to_string())
    }
}

/// Errors in startup configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Minimum allowance above maximum
    #[error("min time allowed {min}s exceeds max {max}s")]
    InvalidBounds {
        /// Configured minimum
        min: u32,
        /// Configured maximum
        max: u32,
    },

    /// Default allowance outside the bounds
    #[error("default time allowed: {0}")]
    DefaultOutOfRange(ArbiterError),

    /// Tick interval of zero
    #[error("tick interval must be non-zero")]
    ZeroTickInterval,

    /// Deadband step outside `1..=100`
    #[error("deadband step {0} must be within 1..=100")]
    InvalidDeadband(u8),
}
