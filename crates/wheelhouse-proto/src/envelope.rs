//! JSON envelope codec.
//!
//! The envelope is deliberately loose (`data` is an untyped
//! [`serde_json::Value`]): typed decoding happens per event in
//! [`crate::payloads`], so an unknown event can be reported by name instead
//! of failing as a generic parse error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ProtocolError, Result};

/// Maximum accepted text frame size (16 KiB).
///
/// Control messages are tens of bytes; anything near this limit is abuse.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// Event names used on the wire.
pub mod events {
    // Participant -> server
    /// Ask to join the turn queue
    pub const REQUEST_ADD: &str = "userRequestAdd";
    /// Holder heartbeat carrying its locally observed remaining seconds
    pub const TIME_LEFT: &str = "timeleft";
    /// Holder ends its turn voluntarily
    pub const TIME_OVER: &str = "timeover";
    /// Control command (current name)
    pub const CONTROL: &str = "controlData";
    /// Control command (legacy name, same payloads)
    pub const CONTROL_LEGACY: &str = "message";
    /// Client announces what it is; the vehicle identifies as an actuator
    pub const IDENTIFY: &str = "identify";

    // Admin -> server
    /// Register as admin observer and fetch the queue
    pub const ADMIN_REQUEST_QUEUE: &str = "adminRequestQueue";
    /// Change one session's time allowance
    pub const ADMIN_UPDATE_USER: &str = "adminUpdateUser";
    /// Remove one session
    pub const ADMIN_REMOVE_USER: &str = "adminRemoveUser";
    /// Expire the holder and promote the next session
    pub const ADMIN_FORCE_NEXT: &str = "adminForceNext";
    /// Stop the vehicle and freeze scheduling
    pub const ADMIN_EMERGENCY_STOP: &str = "adminEmergencyStop";
    /// Change the allowance given to newly admitted sessions
    pub const ADMIN_SET_DEFAULT_TIME: &str = "adminSetDefaultTime";
    /// Lift an emergency freeze without forcing a turn change
    pub const ADMIN_RESUME: &str = "adminResume";
    /// Reorder one session within the queue
    pub const ADMIN_MOVE_USER: &str = "adminMoveUser";

    // Server -> client
    /// Session id assigned to this connection
    pub const SESSION: &str = "session";
    /// Turn granted; payload is the allowance in seconds
    pub const TIME_START: &str = "timestart";
    /// Authoritative remaining seconds for the holder
    pub const COUNTDOWN: &str = "countdown";
    /// Turn revoked
    pub const CONTROL_OFF: &str = "controlOff";
    /// Waiting position update
    pub const QUEUE_POSITION: &str = "queuePosition";
    /// Session removed from the queue by an admin
    pub const REMOVED: &str = "removed";
    /// Emergency stop broadcast
    pub const EMERGENCY_STOP: &str = "emergencyStop";
    /// Normalized command for the actuator
    pub const PI_COMMAND: &str = "pi_command";
    /// Full queue snapshot for admins
    pub const ADMIN_RESPONSE_QUEUE: &str = "adminResponseQueue";
    /// Single row update for admins
    pub const ADMIN_RESPONSE_ROW: &str = "adminResponseRow";
    /// Human readable admin log line
    pub const ADMIN_NOTIFICATION: &str = "adminNotification";
    /// Actuator attach/detach for admins
    pub const PI_STATUS: &str = "piStatus";
    /// Request failed
    pub const ERROR: &str = "error";
}

/// One wire message: an event name plus its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name, see [`events`]
    pub event: String,
    /// Event payload; absent or `null` for events without one
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Envelope {
    /// Build an envelope.
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self { event: event.into(), data }
    }

    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// - `MessageTooLarge` if the frame exceeds [`MAX_MESSAGE_SIZE`]
    /// - `Malformed` if it is not a JSON object with a string `event`
    pub fn parse(text: &str) -> Result<Self> {
        if text.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: text.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Serialize to a text frame.
    ///
    /// # Errors
    ///
    /// `Encode` if serialization fails (only possible for non-string map keys,
    /// which this protocol never produces).
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}
