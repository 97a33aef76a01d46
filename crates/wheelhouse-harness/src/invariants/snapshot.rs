//! Observable arbitration state for invariant checking.

use wheelhouse_core::config::{MAX_TIME_ALLOWED, MIN_TIME_ALLOWED};
use wheelhouse_proto::{SessionId, SessionRow};

/// Ordering-relevant event seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    /// `timestart` delivered to this session
    Grant(SessionId),
    /// Neutral command delivered to the actuator
    Stop,
}

/// Point-in-time view of the arbiter plus the wire history that matters
/// for ordering checks.
#[derive(Debug, Clone)]
pub struct SystemSnapshot {
    /// Queue rows in order
    pub rows: Vec<SessionRow>,
    /// Index of the holder in `rows`
    pub current_index: Option<usize>,
    /// Promotion suspended by an emergency stop
    pub frozen: bool,
    /// Turns granted since start
    pub turns_granted: u64,
    /// Smallest allowance an admin may set
    pub min_time_allowed: u32,
    /// Largest allowance an admin may set
    pub max_time_allowed: u32,
    /// Grants and stops in delivery order
    pub milestones: Vec<Milestone>,
    /// An actuator was attached before the first grant and never replaced,
    /// so every stop is observable
    pub actuator_continuous: bool,
}

impl SystemSnapshot {
    /// Snapshot with default bounds and no history.
    pub fn new(rows: Vec<SessionRow>, current_index: Option<usize>) -> Self {
        Self {
            rows,
            current_index,
            frozen: false,
            turns_granted: 0,
            min_time_allowed: MIN_TIME_ALLOWED,
            max_time_allowed: MAX_TIME_ALLOWED,
            milestones: Vec::new(),
            actuator_continuous: false,
        }
    }

    /// Empty queue, nothing happened yet.
    pub fn empty() -> Self {
        Self::new(Vec::new(), None)
    }

    /// Set the freeze flag.
    #[must_use]
    pub fn with_frozen(mut self, frozen: bool) -> Self {
        self.frozen = frozen;
        self
    }

    /// Set the allowance bounds.
    #[must_use]
    pub fn with_bounds(mut self, min: u32, max: u32) -> Self {
        self.min_time_allowed = min;
        self.max_time_allowed = max;
        self
    }

    /// Set the grant counter.
    #[must_use]
    pub fn with_turns_granted(mut self, turns_granted: u64) -> Self {
        self.turns_granted = turns_granted;
        self
    }

    /// Attach wire history.
    #[must_use]
    pub fn with_milestones(mut self, milestones: Vec<Milestone>, actuator_continuous: bool) -> Self {
        self.milestones = milestones;
        self.actuator_continuous = actuator_continuous;
        self
    }

    /// Row of the current holder.
    pub fn holder(&self) -> Option<&SessionRow> {
        self.current_index.and_then(|idx| self.rows.get(idx))
    }
}
