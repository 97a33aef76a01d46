//! Driver error types.
//!
//! Errors from [`crate::ServerDriver`] event processing. Arbitration
//! rejections (`NotHolder`, `OutOfRange`, ...) never surface here: the
//! driver answers them on the wire and keeps going. What remains are
//! runtime bookkeeping faults and startup misconfiguration.

use wheelhouse_core::ConfigError;
use wheelhouse_proto::SessionId;

/// Errors that can occur during driver operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Event for a session the registry does not know.
    ///
    /// Transient if the connection was just closed; the runtime drops the
    /// event.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// Session id collision on accept.
    ///
    /// The runtime allocates ids through the driver, so this indicates a
    /// bug.
    #[error("session already exists: {0}")]
    SessionAlreadyExists(SessionId),

    /// Arbiter configuration rejected at construction.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
