//! Turn queue: FIFO membership and ordering.
//!
//! The queue owns which sessions are waiting and in what order. It also
//! records the holder's position (`current`), but only the scheduler moves
//! it: the setters are crate-private and every public mutation here keeps the
//! index pointing at the same session it pointed at before.
//!
//! # Invariants
//!
//! - Session ids are unique within the queue.
//! - `current`, when set, is a valid index.
//! - Removing a session before the holder shifts `current` down by one;
//!   removing the holder clears it.

use wheelhouse_proto::{SessionId, SessionRow};

use crate::{config::GlobalConfig, error::ArbiterError, session::Session};

/// Result of [`TurnQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Appended at this position
    Added(usize),
    /// Already queued at this position; nothing changed
    AlreadyQueued(usize),
}

impl Admission {
    /// Position of the session after the call.
    pub fn position(self) -> usize {
        match self {
            Self::Added(position) | Self::AlreadyQueued(position) => position,
        }
    }
}

/// A session taken out of the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal<I> {
    /// The removed session
    pub session: Session<I>,
    /// Where it was
    pub position: usize,
    /// Whether it was the holder
    pub was_holder: bool,
}

/// Ordered sessions waiting for control, plus the holder's position.
#[derive(Debug, Clone)]
pub struct TurnQueue<I> {
    sessions: Vec<Session<I>>,
    current: Option<usize>,
}

impl<I> Default for TurnQueue<I> {
    fn default() -> Self {
        Self { sessions: Vec::new(), current: None }
    }
}

impl<I> TurnQueue<I> {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued sessions, holder included.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether nobody is queued.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions in queue order.
    pub fn iter(&self) -> impl Iterator<Item = &Session<I>> {
        self.sessions.iter()
    }

    /// Session by id.
    pub fn get(&self, id: SessionId) -> Option<&Session<I>> {
        self.sessions.iter().find(|s| s.id() == id)
    }

    /// 0-based rank of a session.
    pub fn position_of(&self, id: SessionId) -> Option<usize> {
        self.sessions.iter().position(|s| s.id() == id)
    }

    /// Whether the session is queued.
    pub fn contains(&self, id: SessionId) -> bool {
        self.position_of(id).is_some()
    }

    /// Holder position.
    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// Holder session.
    pub fn holder(&self) -> Option<&Session<I>> {
        self.current.and_then(|idx| self.sessions.get(idx))
    }

    /// Holder id.
    pub fn holder_id(&self) -> Option<SessionId> {
        self.holder().map(Session::id)
    }

    /// Append a session at the tail unless it is already queued.
    pub fn enqueue(&mut self, id: SessionId, time_allowed: u32) -> Admission {
        if let Some(position) = self.position_of(id) {
            return Admission::AlreadyQueued(position);
        }

        self.sessions.push(Session::new(id, time_allowed));
        Admission::Added(self.sessions.len() - 1)
    }

    /// Remove a session from any position.
    ///
    /// Removing the holder clears `current`; callers that need a stop issued
    /// first go through the scheduler, which expires the turn before removal.
    ///
    /// # Errors
    ///
    /// `NotFound` if the session is not queued.
    pub fn remove(&mut self, id: SessionId) -> Result<Removal<I>, ArbiterError> {
        let position = self.position_of(id).ok_or(ArbiterError::NotFound(id))?;
        let session = self.sessions.remove(position);

        let was_holder = self.current == Some(position);
        self.current = match self.current {
            Some(cur) if cur == position => None,
            Some(cur) if cur > position => Some(cur - 1),
            other => other,
        };

        Ok(Removal { session, position, was_holder })
    }

    /// Change one session's allowance.
    ///
    /// Only the allowance changes here; reconciling a running countdown is
    /// the scheduler's job.
    ///
    /// # Errors
    ///
    /// - `OutOfRange` if `seconds` is outside the configured bounds
    /// - `NotFound` if the session is not queued
    pub fn update_time_allowed(
        &mut self,
        id: SessionId,
        seconds: i64,
        bounds: &GlobalConfig,
    ) -> Result<u32, ArbiterError> {
        let seconds = bounds.validate(seconds)?;
        let session = self.get_mut(id).ok_or(ArbiterError::NotFound(id))?;
        session.set_time_allowed(seconds);
        Ok(seconds)
    }

    /// Move a session to `position`, shifting the others.
    ///
    /// The holder keeps control wherever it ends up.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the session is not queued
    /// - `InvalidPosition` if `position >= len`
    pub fn move_to(&mut self, id: SessionId, position: usize) -> Result<(), ArbiterError> {
        let from = self.position_of(id).ok_or(ArbiterError::NotFound(id))?;
        if position >= self.sessions.len() {
            return Err(ArbiterError::InvalidPosition { position, len: self.sessions.len() });
        }

        let holder = self.holder_id();
        let session = self.sessions.remove(from);
        self.sessions.insert(position, session);
        self.current = holder.and_then(|h| self.position_of(h));

        Ok(())
    }

    /// Admin table rows in queue order.
    pub fn rows(&self) -> Vec<SessionRow> {
        self.sessions.iter().map(Session::row).collect()
    }

    pub(crate) fn get_mut(&mut self, id: SessionId) -> Option<&mut Session<I>> {
        self.sessions.iter_mut().find(|s| s.id() == id)
    }

    pub(crate) fn holder_mut(&mut self) -> Option<&mut Session<I>> {
        self.current.and_then(|idx| self.sessions.get_mut(idx))
    }

    pub(crate) fn head_mut(&mut self) -> Option<&mut Session<I>> {
        self.sessions.first_mut()
    }

    pub(crate) fn set_current(&mut self, current: Option<usize>) {
        debug_assert!(current.is_none_or(|idx| idx < self.sessions.len()));
        self.current = current;
    }
}
