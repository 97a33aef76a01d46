//! Arbiter: queue, scheduler and relay behind one action-returning API.
//!
//! Each operation runs to completion and returns the actions the driver must
//! execute, in order. Operations that can end or start a turn finish with a
//! settle step: promote the head of the queue if the vehicle is free, then
//! report one `QueueChanged` if membership, order or holder changed.
//!
//! Because the arbiter is a single-writer value with no interior locking, a
//! command processed after an expiry sees the expired state and is rejected;
//! ordering is decided entirely by the order operations are called in.

use std::{ops::Sub, time::Duration};

use wheelhouse_proto::{ControlPayload, DriveCommand, QueueSnapshot, SessionId, SessionRow};

use crate::{
    config::ArbiterConfig,
    error::ArbiterError,
    queue::{Admission, TurnQueue},
    relay::{CommandRelay, RelayStats},
    scheduler::{ExpiryReason, TurnScheduler, TurnState},
};

/// Effects of an arbiter operation, for the driver to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArbiterAction {
    /// A session now holds control
    Granted {
        /// New holder
        session_id: SessionId,
        /// Its allowance in seconds
        time_allowed: u32,
    },

    /// Authoritative remaining time for the holder
    Countdown {
        /// Holder
        session_id: SessionId,
        /// Seconds left
        time_remaining: u32,
    },

    /// A session lost control
    Revoked {
        /// Former holder
        session_id: SessionId,
        /// Why
        reason: ExpiryReason,
    },

    /// Command for the actuator
    Actuate {
        /// Normalized command
        command: DriveCommand,
        /// Set for emergency stops
        emergency: bool,
    },

    /// Queue membership, order or holder changed
    QueueChanged,

    /// One session's row changed outside the countdown
    SessionUpdated(SessionRow),

    /// An admin removed a waiting session
    SessionRemoved(SessionId),

    /// Emergency stop issued; promotion is frozen
    EmergencyStopped {
        /// Holder at the time, if any
        holder: Option<SessionId>,
    },

    /// Emergency freeze lifted
    Resumed,

    /// Client-reported countdown disagrees with the server
    Diverged {
        /// Holder
        session_id: SessionId,
        /// Seconds the client reported
        reported: i64,
        /// Seconds the server holds
        authoritative: u32,
    },

    /// Admin-facing description of a change
    Notice(String),

    /// Non-fatal fault worth logging
    Warning(ArbiterError),
}

/// Turn arbitration state for one vehicle.
///
/// Generic over the instant type so simulations can drive it with virtual
/// time.
#[derive(Debug, Clone)]
pub struct Arbiter<I> {
    pub(crate) config: ArbiterConfig,
    pub(crate) queue: TurnQueue<I>,
    pub(crate) scheduler: TurnScheduler,
    pub(crate) relay: CommandRelay,
}

impl<I> Arbiter<I>
where
    I: Copy + Sub<Output = Duration>,
{
    /// Empty arbiter.
    pub fn new(config: ArbiterConfig) -> Self {
        Self {
            scheduler: TurnScheduler::new(&config),
            relay: CommandRelay::new(config.deadband_step),
            queue: TurnQueue::new(),
            config,
        }
    }

    /// Active configuration, including admin changes.
    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    /// The queue.
    pub fn queue(&self) -> &TurnQueue<I> {
        &self.queue
    }

    /// Scheduler state.
    pub fn state(&self) -> TurnState {
        self.scheduler.state()
    }

    /// Current holder.
    pub fn holder(&self) -> Option<SessionId> {
        self.queue.holder_id()
    }

    /// Whether promotion is suspended.
    pub fn is_frozen(&self) -> bool {
        self.scheduler.is_frozen()
    }

    /// Total grants since startup.
    pub fn turns_granted(&self) -> u64 {
        self.scheduler.turns_granted()
    }

    /// Relay counters.
    pub fn relay_stats(&self) -> RelayStats {
        self.relay.stats()
    }

    /// Last command forwarded to the actuator.
    pub fn last_command(&self) -> Option<DriveCommand> {
        self.relay.last_forwarded()
    }

    /// Full queue state for admins.
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            queue: self.queue.rows(),
            current_index: self.queue.current_index(),
            config: self.config.time.timing(),
            frozen: self.scheduler.is_frozen(),
        }
    }

    /// Admit a session at the tail of the queue.
    ///
    /// Idempotent: a queued session keeps its place. A new arrival lifts an
    /// emergency freeze.
    pub fn enqueue(&mut self, session_id: SessionId, now: I) -> (Admission, Vec<ArbiterAction>) {
        let mut actions = Vec::new();
        let admission = self.queue.enqueue(session_id, self.config.time.default_time_allowed);

        let added = matches!(admission, Admission::Added(_));
        if added && self.scheduler.unfreeze() {
            actions.push(ArbiterAction::Resumed);
        }

        self.settle(now, added, &mut actions);
        (admission, actions)
    }

    /// Holder ends its turn early.
    ///
    /// # Errors
    ///
    /// `NotHolder` if `session_id` does not hold control.
    pub fn release(
        &mut self,
        session_id: SessionId,
        now: I,
    ) -> Result<Vec<ArbiterAction>, ArbiterError> {
        self.require_holder(session_id)?;

        let mut actions = Vec::new();
        self.scheduler.expire(&mut self.queue, &mut self.relay, ExpiryReason::Released, &mut actions);
        self.settle(now, true, &mut actions);
        Ok(actions)
    }

    /// Connection closed. Always accepted.
    ///
    /// A holder is revoked (with a stop); a waiting session is dropped.
    pub fn disconnect(&mut self, session_id: SessionId, now: I) -> Vec<ArbiterAction> {
        let mut actions = Vec::new();

        let changed = if self.queue.holder_id() == Some(session_id) {
            if let Some(holder) = self.queue.holder_mut() {
                holder.set_connected(false);
            }
            self.scheduler.expire(
                &mut self.queue,
                &mut self.relay,
                ExpiryReason::Disconnected,
                &mut actions,
            );
            true
        } else {
            self.queue.remove(session_id).is_ok()
        };

        self.settle(now, changed, &mut actions);
        actions
    }

    /// Holder liveness signal.
    ///
    /// # Errors
    ///
    /// `NotHolder` if `session_id` does not hold control.
    pub fn heartbeat(
        &mut self,
        session_id: SessionId,
        reported: i64,
        now: I,
    ) -> Result<Vec<ArbiterAction>, ArbiterError> {
        let mut actions = Vec::new();
        self.scheduler.heartbeat(&mut self.queue, session_id, reported, now, &mut actions)?;
        Ok(actions)
    }

    /// Control command from a client.
    ///
    /// # Errors
    ///
    /// `NotHolder` if `session_id` does not hold control.
    pub fn submit(
        &mut self,
        session_id: SessionId,
        payload: &ControlPayload,
    ) -> Result<Vec<ArbiterAction>, ArbiterError> {
        let holder = self.queue.holder_id();
        let forwarded = self.relay.submit(session_id, holder, payload)?;

        Ok(forwarded
            .map(|command| ArbiterAction::Actuate { command, emergency: false })
            .into_iter()
            .collect())
    }

    /// One scheduler tick: countdown, liveness, promotion.
    pub fn tick(&mut self, now: I) -> Vec<ArbiterAction> {
        let mut actions = Vec::new();
        let ended = self.scheduler.tick(&mut self.queue, &mut self.relay, now, &mut actions);
        self.settle(now, ended, &mut actions);
        actions
    }

    /// A vehicle attached; make sure it starts stationary.
    pub fn actuator_attached(&mut self) -> Vec<ArbiterAction> {
        let command = self.relay.force_stop();
        vec![ArbiterAction::Actuate { command, emergency: false }]
    }

    pub(crate) fn require_holder(&self, session_id: SessionId) -> Result<(), ArbiterError> {
        let holder = self.queue.holder_id();
        if holder == Some(session_id) {
            Ok(())
        } else {
            Err(ArbiterError::NotHolder { session_id, holder })
        }
    }

    /// Promote if possible, then report the queue change once.
    pub(crate) fn settle(&mut self, now: I, changed: bool, actions: &mut Vec<ArbiterAction>) {
        let promoted = self.scheduler.promote(&mut self.queue, now, actions).is_some();
        if changed || promoted {
            actions.push(ArbiterAction::QueueChanged);
        }
    }
}
