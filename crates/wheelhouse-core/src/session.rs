//! Queued session state.

use wheelhouse_proto::{SessionId, SessionRow};

/// One client waiting for, or holding, control.
///
/// Created on admission and dropped on disconnect, completed turn or admin
/// removal. Ids are never reused, so a dropped session cannot come back; the
/// client must request again and gets a fresh entry at the tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session<I> {
    id: SessionId,
    connected: bool,
    time_allowed: u32,
    time_remaining: u32,
    last_heartbeat_at: Option<I>,
}

impl<I> Session<I> {
    /// New waiting session with the given allowance.
    pub fn new(id: SessionId, time_allowed: u32) -> Self {
        Self { id, connected: true, time_allowed, time_remaining: 0, last_heartbeat_at: None }
    }

    /// Session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Whether the client connection is open.
    pub fn connected(&self) -> bool {
        self.connected
    }

    /// Turn allowance in seconds.
    pub fn time_allowed(&self) -> u32 {
        self.time_allowed
    }

    /// Seconds left; zero unless this session holds control.
    pub fn time_remaining(&self) -> u32 {
        self.time_remaining
    }

    /// When the holder last proved liveness.
    pub fn last_heartbeat_at(&self) -> Option<&I> {
        self.last_heartbeat_at.as_ref()
    }

    /// Admin table row.
    pub fn row(&self) -> SessionRow {
        SessionRow {
            sid: self.id,
            time_allowed: self.time_allowed,
            time_remaining: self.time_remaining,
            connected: self.connected,
        }
    }

    pub(crate) fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub(crate) fn set_time_allowed(&mut self, seconds: u32) {
        self.time_allowed = seconds;
    }

    pub(crate) fn set_time_remaining(&mut self, seconds: u32) {
        self.time_remaining = seconds;
    }

    pub(crate) fn set_last_heartbeat_at(&mut self, at: Option<I>) {
        self.last_heartbeat_at = at;
    }
}
