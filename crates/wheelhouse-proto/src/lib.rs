//! Wheelhouse wire protocol.
//!
//! Every WebSocket text frame carries one JSON [`Envelope`]:
//! `{"event": <name>, "data": <payload>}`. Event names are the routing key
//! (the equivalent of an opcode); the payload shape is fixed per event.
//!
//! Inbound traffic decodes into [`ClientMessage`], outbound traffic is built
//! from [`ServerMessage`]. Control commands arrive in three historical
//! encodings (percent pair, discrete direction pair, legacy key string) and
//! are all decoded into [`ControlPayload`] here, at the boundary, so the rest
//! of the system only sees typed values.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod payloads;

pub use envelope::{Envelope, MAX_MESSAGE_SIZE, events};
pub use errors::{ProtocolError, Result};
pub use ids::SessionId;
pub use payloads::{
    AdminRequest, ClientMessage, ErrorPayload, ServerMessage,
    admin::{
        ActuatorStatus, AdminNotification, MoveUser, QueueSnapshot, RemoveUser, SessionRow,
        SetDefaultTime, TimingConfig, UpdateUser,
    },
    control::{ActuatorCommand, ArrowKey, ControlPayload, DriveCommand, KeyEvent, Throttle, Turn},
    session::{Countdown, Heartbeat, Identify, QueuePosition, Removed, SessionAssigned},
};
