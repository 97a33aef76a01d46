//! Connection registry: who is connected and in which role.
//!
//! Every WebSocket connection is registered under its session id as a
//! participant. A connection becomes an admin observer by asking for the
//! queue snapshot, and the vehicle becomes the actuator by identifying
//! itself. At most one actuator is attached at a time; a second one
//! displaces the first.
//!
//! Sessions are kept ordered by id so fan-out order is reproducible under
//! simulation.

use std::collections::BTreeMap;

use wheelhouse_proto::SessionId;

/// What a connection is allowed to see and do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Regular client; may queue for control
    #[default]
    Participant,
    /// Observer with access to the admin plane
    Admin,
    /// The vehicle; receives normalized commands
    Actuator,
}

/// Information about a registered connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    /// Current role
    pub role: Role,
    /// User agent reported via `identify`, if any
    pub user_agent: Option<String>,
}

/// Registry of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: BTreeMap<SessionId, ConnectionInfo>,
    actuator: Option<SessionId>,
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection as a participant.
    ///
    /// Returns `false` if the session id is already registered.
    pub fn register(&mut self, session_id: SessionId) -> bool {
        if self.sessions.contains_key(&session_id) {
            return false;
        }
        self.sessions.insert(session_id, ConnectionInfo::default());
        true
    }

    /// Unregister a connection, detaching it as actuator if it was one.
    pub fn unregister(&mut self, session_id: SessionId) -> Option<ConnectionInfo> {
        let info = self.sessions.remove(&session_id)?;
        if self.actuator == Some(session_id) {
            self.actuator = None;
        }
        Some(info)
    }

    /// Connection metadata. `None` if not registered.
    pub fn get(&self, session_id: SessionId) -> Option<&ConnectionInfo> {
        self.sessions.get(&session_id)
    }

    /// Check if a session is registered.
    pub fn contains(&self, session_id: SessionId) -> bool {
        self.sessions.contains_key(&session_id)
    }

    /// Record the user agent a connection identified with.
    pub fn set_user_agent(&mut self, session_id: SessionId, user_agent: String) -> bool {
        match self.sessions.get_mut(&session_id) {
            Some(info) => {
                info.user_agent = Some(user_agent);
                true
            },
            None => false,
        }
    }

    /// Grant admin observer rights.
    ///
    /// Returns `false` for unknown sessions and for the actuator, which
    /// never observes.
    pub fn promote_admin(&mut self, session_id: SessionId) -> bool {
        match self.sessions.get_mut(&session_id) {
            Some(info) if info.role != Role::Actuator => {
                info.role = Role::Admin;
                true
            },
            _ => false,
        }
    }

    /// Check if a session is an admin observer.
    pub fn is_admin(&self, session_id: SessionId) -> bool {
        self.sessions.get(&session_id).is_some_and(|info| info.role == Role::Admin)
    }

    /// Attach a connection as the actuator.
    ///
    /// Returns the previously attached actuator if a different connection
    /// held the role; it is demoted to participant. Unknown sessions are
    /// ignored.
    pub fn attach_actuator(&mut self, session_id: SessionId) -> Option<SessionId> {
        let info = self.sessions.get_mut(&session_id)?;
        info.role = Role::Actuator;

        let previous = self.actuator.replace(session_id).filter(|prev| *prev != session_id);
        if let Some(prev) = previous {
            if let Some(info) = self.sessions.get_mut(&prev) {
                info.role = Role::Participant;
            }
        }
        previous
    }

    /// Attached actuator, if any.
    pub fn actuator(&self) -> Option<SessionId> {
        self.actuator
    }

    /// All admin observers.
    pub fn admins(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.with_role(Role::Admin)
    }

    /// Every connection that is not the actuator.
    pub fn viewers(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.sessions
            .iter()
            .filter(|(_, info)| info.role != Role::Actuator)
            .map(|(id, _)| *id)
    }

    fn with_role(&self, role: Role) -> impl Iterator<Item = SessionId> + '_ {
        self.sessions.iter().filter(move |(_, info)| info.role == role).map(|(id, _)| *id)
    }

    /// Total number of registered connections.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// No connections registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
