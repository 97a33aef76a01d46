//! Operations for model-based testing.
//!
//! Operations represent everything a participant, the admin or the clock can
//! do. They are generated randomly by proptest and applied to both the model
//! and the real server.

/// Participant identifier (0-indexed).
pub type ClientId = u8;

/// Operations that can be applied to the system.
///
/// Admin operations are issued by a single dedicated admin connection and
/// name their target by participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Participant opens a connection.
    Connect {
        /// Participant connecting.
        client: ClientId,
    },

    /// Participant closes its connection.
    Disconnect {
        /// Participant leaving.
        client: ClientId,
    },

    /// Participant asks to join the queue (`userRequestAdd`).
    RequestControl {
        /// Requesting participant.
        client: ClientId,
    },

    /// Holder gives up the rest of its turn (`timeover`).
    EndTurn {
        /// Participant ending.
        client: ClientId,
    },

    /// Liveness signal (`timeleft`).
    Heartbeat {
        /// Participant signalling.
        client: ClientId,
    },

    /// Percent-form control command.
    Drive {
        /// Participant driving.
        client: ClientId,
        /// Throttle percent.
        throttle: i8,
        /// Steering percent.
        steer: i8,
    },

    /// One scheduler tick.
    Tick,

    /// Admin skips the holder.
    ForceNext,

    /// Admin stops the vehicle and freezes promotion.
    EmergencyStop,

    /// Admin lifts the freeze.
    Resume,

    /// Admin removes a participant from the queue.
    RemoveUser {
        /// Participant to remove.
        target: ClientId,
    },

    /// Admin changes one participant's allowance.
    UpdateUser {
        /// Participant to change.
        target: ClientId,
        /// New allowance in seconds, possibly out of range.
        seconds: u16,
    },

    /// Admin changes the default allowance.
    SetDefaultTime {
        /// New default in seconds, possibly out of range.
        seconds: u16,
    },

    /// Admin reorders the queue.
    MoveUser {
        /// Participant to move.
        target: ClientId,
        /// Destination index, possibly past the end.
        position: u8,
    },
}

/// Result of applying an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation succeeded.
    Ok,
    /// Operation failed with an error.
    Error(OperationError),
}

/// Errors that can occur when applying operations.
///
/// Connection errors are rejected by the harness before anything reaches
/// the server; the rest mirror wire error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    /// Participant is already connected.
    AlreadyConnected,
    /// Participant is not connected.
    NotConnected,
    /// Sender does not hold control (`NOT_HOLDER`).
    NotHolder,
    /// Target is not queued (`NOT_FOUND`).
    NotFound,
    /// Allowance outside the bounds (`OUT_OF_RANGE`).
    OutOfRange,
    /// Queue index past the end (`INVALID_POSITION`).
    InvalidPosition,
}

impl OperationError {
    /// Whether the server saw the operation at all.
    pub fn reached_server(self) -> bool {
        !matches!(self, Self::AlreadyConnected | Self::NotConnected)
    }
}

impl OperationResult {
    /// Returns true if the operation succeeded.
    pub fn is_ok(&self) -> bool {
        matches!(self, OperationResult::Ok)
    }

    /// Returns true if the operation failed.
    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }
}

impl From<Result<(), OperationError>> for OperationResult {
    fn from(result: Result<(), OperationError>) -> Self {
        match result {
            Ok(()) => Self::Ok,
            Err(e) => Self::Error(e),
        }
    }
}
