//! Protocol error types.

use thiserror::Error;

/// Errors produced while decoding or encoding wire messages.
///
/// None of these are fatal to a connection: the server answers with an
/// `error` message and keeps reading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Text frame is not valid JSON or not shaped like an envelope
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Text frame exceeds [`crate::MAX_MESSAGE_SIZE`]
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Actual size in bytes
        size: usize,
        /// Maximum allowed size in bytes
        max: usize,
    },

    /// Envelope names an event this protocol does not define
    #[error("unknown event: {0:?}")]
    UnknownEvent(String),

    /// Payload does not match the shape expected for its event
    #[error("invalid payload for {event}: {reason}")]
    InvalidPayload {
        /// Event whose payload failed to decode
        event: &'static str,
        /// Decoder message
        reason: String,
    },

    /// Session id is not a 64-bit hex string
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),

    /// Legacy key command string is not `<KEY> pressed|released`
    #[error("unrecognized key command: {0:?}")]
    UnknownKeyCommand(String),

    /// Serialization of an outbound message failed
    #[error("encode failed: {0}")]
    Encode(String),
}

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
