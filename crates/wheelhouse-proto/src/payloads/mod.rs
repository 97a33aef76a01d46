//! Typed protocol messages.
//!
//! The envelope's `event` name determines the payload type, the same way an
//! opcode would in a binary protocol. Decoding dispatches on the name first
//! and only then deserializes `data` into the matching struct, so errors name
//! the event that carried bad data.
//!
//! # Invariants
//!
//! Each variant maps to exactly one event name (enforced by match
//! exhaustiveness in `event()`, `encode()` and `from_envelope()`). The two
//! control event names (`controlData` and legacy `message`) decode to the
//! same variant; encoding always uses `controlData`.

pub mod admin;
pub mod control;
pub mod session;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    envelope::{Envelope, events},
    errors::{ProtocolError, Result},
};

/// Administrative requests. Only accepted from registered admin observers,
/// except `RequestQueue`, which is how a connection registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminRequest {
    /// Register as admin observer and receive a snapshot
    RequestQueue,
    /// Change one session's allowance
    UpdateUser(admin::UpdateUser),
    /// Remove one session
    RemoveUser(admin::RemoveUser),
    /// Expire the holder, promote the next session
    ForceNext,
    /// Stop the vehicle and suspend promotion
    EmergencyStop,
    /// Change the default allowance for new sessions
    SetDefaultTime(admin::SetDefaultTime),
    /// Lift the emergency freeze
    Resume,
    /// Reorder one session
    MoveUser(admin::MoveUser),
}

impl AdminRequest {
    /// Event name for this request.
    pub const fn event(&self) -> &'static str {
        match self {
            Self::RequestQueue => events::ADMIN_REQUEST_QUEUE,
            Self::UpdateUser(_) => events::ADMIN_UPDATE_USER,
            Self::RemoveUser(_) => events::ADMIN_REMOVE_USER,
            Self::ForceNext => events::ADMIN_FORCE_NEXT,
            Self::EmergencyStop => events::ADMIN_EMERGENCY_STOP,
            Self::SetDefaultTime(_) => events::ADMIN_SET_DEFAULT_TIME,
            Self::Resume => events::ADMIN_RESUME,
            Self::MoveUser(_) => events::ADMIN_MOVE_USER,
        }
    }

    fn data(&self) -> Result<Value> {
        match self {
            Self::RequestQueue | Self::ForceNext | Self::EmergencyStop | Self::Resume => {
                Ok(Value::Null)
            },
            Self::UpdateUser(inner) => to_data(inner),
            Self::RemoveUser(inner) => to_data(inner),
            Self::SetDefaultTime(inner) => to_data(inner),
            Self::MoveUser(inner) => to_data(inner),
        }
    }
}

/// Messages a client sends to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Join the turn queue (`userRequestAdd`)
    RequestControl,
    /// Holder liveness signal (`timeleft`)
    Heartbeat(session::Heartbeat),
    /// Holder gives up the rest of its turn (`timeover`)
    EndTurn,
    /// Control command (`controlData` or legacy `message`)
    Control(control::ControlPayload),
    /// Client self-description (`identify`)
    Identify(session::Identify),
    /// Admin plane request
    Admin(AdminRequest),
}

impl ClientMessage {
    /// Parse and decode one text frame.
    ///
    /// # Errors
    ///
    /// Any [`ProtocolError`] from envelope parsing or payload decoding.
    pub fn decode(text: &str) -> Result<Self> {
        Self::from_envelope(Envelope::parse(text)?)
    }

    /// Decode a parsed envelope.
    ///
    /// Events without a payload ignore whatever `data` carries; old clients
    /// send placeholder strings there.
    ///
    /// # Errors
    ///
    /// - `UnknownEvent` if the event name is not a client event
    /// - `InvalidPayload` / `UnknownKeyCommand` if `data` does not decode
    pub fn from_envelope(envelope: Envelope) -> Result<Self> {
        let Envelope { event, data } = envelope;

        let message = match event.as_str() {
            events::REQUEST_ADD => Self::RequestControl,
            events::TIME_LEFT => Self::Heartbeat(decode_heartbeat(data)?),
            events::TIME_OVER => Self::EndTurn,
            events::CONTROL | events::CONTROL_LEGACY => {
                Self::Control(control::ControlPayload::from_value(data)?)
            },
            events::IDENTIFY => Self::Identify(from_data(events::IDENTIFY, data)?),
            events::ADMIN_REQUEST_QUEUE => Self::Admin(AdminRequest::RequestQueue),
            events::ADMIN_UPDATE_USER => {
                Self::Admin(AdminRequest::UpdateUser(from_data(events::ADMIN_UPDATE_USER, data)?))
            },
            events::ADMIN_REMOVE_USER => {
                Self::Admin(AdminRequest::RemoveUser(from_data(events::ADMIN_REMOVE_USER, data)?))
            },
            events::ADMIN_FORCE_NEXT => Self::Admin(AdminRequest::ForceNext),
            events::ADMIN_EMERGENCY_STOP => Self::Admin(AdminRequest::EmergencyStop),
            events::ADMIN_SET_DEFAULT_TIME => Self::Admin(AdminRequest::SetDefaultTime(
                from_data(events::ADMIN_SET_DEFAULT_TIME, data)?,
            )),
            events::ADMIN_RESUME => Self::Admin(AdminRequest::Resume),
            events::ADMIN_MOVE_USER => {
                Self::Admin(AdminRequest::MoveUser(from_data(events::ADMIN_MOVE_USER, data)?))
            },
            _ => return Err(ProtocolError::UnknownEvent(event)),
        };

        Ok(message)
    }

    /// Event name for this message.
    pub const fn event(&self) -> &'static str {
        match self {
            Self::RequestControl => events::REQUEST_ADD,
            Self::Heartbeat(_) => events::TIME_LEFT,
            Self::EndTurn => events::TIME_OVER,
            Self::Control(_) => events::CONTROL,
            Self::Identify(_) => events::IDENTIFY,
            Self::Admin(req) => req.event(),
        }
    }

    /// Build the envelope for this message.
    ///
    /// # Errors
    ///
    /// `Encode` if a payload fails to serialize.
    pub fn to_envelope(&self) -> Result<Envelope> {
        let data = match self {
            Self::RequestControl | Self::EndTurn => Value::Null,
            Self::Heartbeat(inner) => to_data(inner)?,
            Self::Control(inner) => inner.to_value(),
            Self::Identify(inner) => to_data(inner)?,
            Self::Admin(req) => req.data()?,
        };

        Ok(Envelope::new(self.event(), data))
    }

    /// Encode to a text frame.
    ///
    /// # Errors
    ///
    /// `Encode` if serialization fails.
    pub fn encode(&self) -> Result<String> {
        self.to_envelope()?.to_json()
    }
}

/// Messages the server sends to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Session id for this connection (`session`)
    Session(session::SessionAssigned),
    /// Turn granted with this many seconds (`timestart`, bare number)
    TimeStart(u32),
    /// Authoritative remaining time (`countdown`)
    Countdown(session::Countdown),
    /// Turn revoked (`controlOff`)
    ControlOff,
    /// Waiting position (`queuePosition`)
    QueuePosition(session::QueuePosition),
    /// Removed by an admin (`removed`)
    Removed(session::Removed),
    /// Emergency stop broadcast (`emergencyStop`)
    EmergencyStop,
    /// Command for the actuator (`pi_command`)
    ActuatorCommand(control::ActuatorCommand),
    /// Queue snapshot for admins (`adminResponseQueue`)
    AdminQueue(admin::QueueSnapshot),
    /// Row update for admins (`adminResponseRow`)
    AdminRow(admin::SessionRow),
    /// Admin log line (`adminNotification`)
    AdminNotification(admin::AdminNotification),
    /// Actuator presence (`piStatus`)
    ActuatorStatus(admin::ActuatorStatus),
    /// Request failed (`error`)
    Error(ErrorPayload),
}

/// Payload of `controlOff`, kept for clients that check it.
const CONTROL_OFF_ACK: &str = "ack";

impl ServerMessage {
    /// Event name for this message.
    pub const fn event(&self) -> &'static str {
        match self {
            Self::Session(_) => events::SESSION,
            Self::TimeStart(_) => events::TIME_START,
            Self::Countdown(_) => events::COUNTDOWN,
            Self::ControlOff => events::CONTROL_OFF,
            Self::QueuePosition(_) => events::QUEUE_POSITION,
            Self::Removed(_) => events::REMOVED,
            Self::EmergencyStop => events::EMERGENCY_STOP,
            Self::ActuatorCommand(_) => events::PI_COMMAND,
            Self::AdminQueue(_) => events::ADMIN_RESPONSE_QUEUE,
            Self::AdminRow(_) => events::ADMIN_RESPONSE_ROW,
            Self::AdminNotification(_) => events::ADMIN_NOTIFICATION,
            Self::ActuatorStatus(_) => events::PI_STATUS,
            Self::Error(_) => events::ERROR,
        }
    }

    /// Build the envelope for this message.
    ///
    /// # Errors
    ///
    /// `Encode` if a payload fails to serialize.
    pub fn to_envelope(&self) -> Result<Envelope> {
        let data = match self {
            Self::Session(inner) => to_data(inner)?,
            Self::TimeStart(seconds) => Value::from(*seconds),
            Self::Countdown(inner) => to_data(inner)?,
            Self::ControlOff => Value::from(CONTROL_OFF_ACK),
            Self::QueuePosition(inner) => to_data(inner)?,
            Self::Removed(inner) => to_data(inner)?,
            Self::EmergencyStop => Value::Null,
            Self::ActuatorCommand(inner) => to_data(inner)?,
            Self::AdminQueue(inner) => to_data(inner)?,
            Self::AdminRow(inner) => to_data(inner)?,
            Self::AdminNotification(inner) => to_data(inner)?,
            Self::ActuatorStatus(inner) => to_data(inner)?,
            Self::Error(inner) => to_data(inner)?,
        };

        Ok(Envelope::new(self.event(), data))
    }

    /// Encode to a text frame.
    ///
    /// # Errors
    ///
    /// `Encode` if serialization fails.
    pub fn encode(&self) -> Result<String> {
        self.to_envelope()?.to_json()
    }

    /// Parse and decode one text frame (client side).
    ///
    /// # Errors
    ///
    /// Any [`ProtocolError`] from envelope parsing or payload decoding.
    pub fn decode(text: &str) -> Result<Self> {
        Self::from_envelope(Envelope::parse(text)?)
    }

    /// Decode a parsed envelope (client side).
    ///
    /// # Errors
    ///
    /// - `UnknownEvent` if the event name is not a server event
    /// - `InvalidPayload` if `data` does not decode
    pub fn from_envelope(envelope: Envelope) -> Result<Self> {
        let Envelope { event, data } = envelope;

        let message = match event.as_str() {
            events::SESSION => Self::Session(from_data(events::SESSION, data)?),
            events::TIME_START => Self::TimeStart(from_data(events::TIME_START, data)?),
            events::COUNTDOWN => Self::Countdown(from_data(events::COUNTDOWN, data)?),
            events::CONTROL_OFF => Self::ControlOff,
            events::QUEUE_POSITION => Self::QueuePosition(from_data(events::QUEUE_POSITION, data)?),
            events::REMOVED => Self::Removed(from_data(events::REMOVED, data)?),
            events::EMERGENCY_STOP => Self::EmergencyStop,
            events::PI_COMMAND => Self::ActuatorCommand(from_data(events::PI_COMMAND, data)?),
            events::ADMIN_RESPONSE_QUEUE => {
                Self::AdminQueue(from_data(events::ADMIN_RESPONSE_QUEUE, data)?)
            },
            events::ADMIN_RESPONSE_ROW => Self::AdminRow(from_data(events::ADMIN_RESPONSE_ROW, data)?),
            events::ADMIN_NOTIFICATION => {
                Self::AdminNotification(from_data(events::ADMIN_NOTIFICATION, data)?)
            },
            events::PI_STATUS => Self::ActuatorStatus(from_data(events::PI_STATUS, data)?),
            events::ERROR => Self::Error(from_data(events::ERROR, data)?),
            _ => return Err(ProtocolError::UnknownEvent(event)),
        };

        Ok(message)
    }
}

/// Payload of the `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Machine readable code, one of the constants below
    pub code: String,
    /// Human readable explanation
    pub message: String,
}

impl ErrorPayload {
    /// Control command from a session that does not hold control.
    pub const NOT_HOLDER: &'static str = "NOT_HOLDER";
    /// Time value outside the configured bounds.
    pub const OUT_OF_RANGE: &'static str = "OUT_OF_RANGE";
    /// Session id not in the queue.
    pub const NOT_FOUND: &'static str = "NOT_FOUND";
    /// Message could not be decoded.
    pub const INVALID_MESSAGE: &'static str = "INVALID_MESSAGE";
    /// Admin request from a connection that is not an admin observer.
    pub const FORBIDDEN: &'static str = "FORBIDDEN";
    /// Move target outside the queue.
    pub const INVALID_POSITION: &'static str = "INVALID_POSITION";
    /// Server refused the connection.
    pub const SERVER_FULL: &'static str = "SERVER_FULL";

    /// Build an error payload.
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self { code: code.to_string(), message: message.into() }
    }

    /// Create an invalid message error.
    pub fn invalid_message(msg: impl Into<String>) -> Self {
        Self::new(Self::INVALID_MESSAGE, msg)
    }

    /// Create a forbidden error.
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(Self::FORBIDDEN, msg)
    }
}

fn from_data<T: DeserializeOwned>(event: &'static str, data: Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| ProtocolError::InvalidPayload { event, reason: e.to_string() })
}

fn to_data<T: Serialize>(inner: &T) -> Result<Value> {
    serde_json::to_value(inner).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Older clients send `timeleft` with a bare number or nothing at all.
fn decode_heartbeat(data: Value) -> Result<session::Heartbeat> {
    match data {
        Value::Null => Ok(session::Heartbeat::default()),
        Value::Number(_) | Value::String(_) => admin::lenient_i64(data)
            .map(|seconds_remaining| session::Heartbeat { seconds_remaining })
            .map_err(|e| ProtocolError::InvalidPayload {
                event: events::TIME_LEFT,
                reason: e.to_string(),
            }),
        other => from_data(events::TIME_LEFT, other),
    }
}
