//! Turn scheduler: the single authority on who controls the vehicle.
//!
//! # State Machine
//!
//! ```text
//!          promote (queue non-empty, not frozen)
//! ┌──────┐ ─────────────────────────────────> ┌─────────┐
//! │ Idle │                                    │ Granted │ <── tick: countdown
//! └──────┘ <──────────── ┌──────────┐ <────── └─────────┘
//!          stop, revoke, │ Expiring │  time up, release, disconnect,
//!          dequeue       └──────────┘  heartbeat loss, admin action
//! ```
//!
//! Expiry is synchronous: one call issues the stop, revokes the holder,
//! dequeues it and returns to `Idle`. `Expiring` is only observable from
//! inside that call. Promotion happens afterwards, in a separate step, so a
//! stop always precedes the next grant.
//!
//! The countdown is server-driven: one tick is one second off the holder's
//! allowance. Heartbeats prove the holder is alive; the seconds they report
//! are compared with the authoritative value but never change it.

use std::{ops::Sub, time::Duration};

use wheelhouse_proto::SessionId;

use crate::{
    arbiter::ArbiterAction, config::ArbiterConfig, error::ArbiterError, queue::TurnQueue,
    relay::CommandRelay, session::Session,
};

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Nobody holds control
    Idle,
    /// A session holds control and its countdown is running
    Granted,
    /// The holder is being revoked
    Expiring,
}

/// Why a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    /// Countdown reached zero
    TimeUp,
    /// Holder ended its turn
    Released,
    /// Holder's connection closed
    Disconnected,
    /// Holder stopped sending heartbeats
    HeartbeatLost,
    /// Admin skipped to the next session
    ForcedNext,
    /// Admin removed the holder
    Removed,
    /// Admin emergency stop; the holder keeps its queue position
    EmergencyStop,
}

impl ExpiryReason {
    /// Whether the former holder stays queued.
    pub fn keeps_position(self) -> bool {
        matches!(self, Self::EmergencyStop)
    }

    /// Short human readable description.
    pub fn describe(self) -> &'static str {
        match self {
            Self::TimeUp => "time up",
            Self::Released => "released",
            Self::Disconnected => "disconnected",
            Self::HeartbeatLost => "heartbeat lost",
            Self::ForcedNext => "skipped by admin",
            Self::Removed => "removed by admin",
            Self::EmergencyStop => "emergency stop",
        }
    }
}

/// Turn lifecycle state machine.
///
/// Holds no queue of its own; every operation takes the queue and relay it
/// acts on and appends the resulting actions.
#[derive(Debug, Clone)]
pub struct TurnScheduler {
    state: TurnState,
    frozen: bool,
    turns_granted: u64,
    heartbeat_timeout: Option<Duration>,
    drift_tolerance: u32,
}

impl TurnScheduler {
    /// Idle scheduler.
    pub fn new(config: &ArbiterConfig) -> Self {
        Self {
            state: TurnState::Idle,
            frozen: false,
            turns_granted: 0,
            heartbeat_timeout: config.heartbeat_timeout(),
            drift_tolerance: config.drift_tolerance,
        }
    }

    /// Current state.
    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Whether promotion is suspended after an emergency stop.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Total grants since startup.
    pub fn turns_granted(&self) -> u64 {
        self.turns_granted
    }

    /// Lift the emergency freeze. Returns whether it was set.
    pub fn unfreeze(&mut self) -> bool {
        std::mem::replace(&mut self.frozen, false)
    }

    /// Grant control to the head of the queue if the vehicle is free.
    ///
    /// Returns the new holder.
    pub fn promote<I>(
        &mut self,
        queue: &mut TurnQueue<I>,
        now: I,
        actions: &mut Vec<ArbiterAction>,
    ) -> Option<SessionId> {
        if self.frozen || self.state != TurnState::Idle || queue.current_index().is_some() {
            return None;
        }

        let head = queue.head_mut()?;
        let time_allowed = head.time_allowed();
        head.set_time_remaining(time_allowed);
        // The grant counts as the first heartbeat
        head.set_last_heartbeat_at(Some(now));
        let session_id = head.id();

        queue.set_current(Some(0));
        self.state = TurnState::Granted;
        self.turns_granted += 1;

        actions.push(ArbiterAction::Granted { session_id, time_allowed });
        Some(session_id)
    }

    /// End the current turn.
    ///
    /// Issues exactly one stop through the relay, revokes the holder and,
    /// unless the reason keeps its position, dequeues it. Does not promote.
    /// Returns the former holder, or `None` if nobody held control.
    pub fn expire<I>(
        &mut self,
        queue: &mut TurnQueue<I>,
        relay: &mut CommandRelay,
        reason: ExpiryReason,
        actions: &mut Vec<ArbiterAction>,
    ) -> Option<Session<I>>
    where
        I: Clone,
    {
        let session_id = queue.holder_id()?;
        self.state = TurnState::Expiring;

        let command = relay.force_stop();
        actions.push(ArbiterAction::Actuate {
            command,
            emergency: reason == ExpiryReason::EmergencyStop,
        });
        actions.push(ArbiterAction::Revoked { session_id, reason });

        if let Some(holder) = queue.holder_mut() {
            holder.set_time_remaining(0);
            holder.set_last_heartbeat_at(None);
        }
        let snapshot = queue.holder().cloned();
        queue.set_current(None);

        let former = if reason.keeps_position() {
            snapshot
        } else {
            queue.remove(session_id).ok().map(|removal| removal.session)
        };

        self.state = TurnState::Idle;
        if reason == ExpiryReason::EmergencyStop {
            self.frozen = true;
        }

        former
    }

    /// Suspend promotion without a holder to revoke.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Advance the countdown by one second.
    ///
    /// Revokes the holder when its heartbeat is overdue or its time is up.
    /// Returns whether the turn ended.
    pub fn tick<I>(
        &mut self,
        queue: &mut TurnQueue<I>,
        relay: &mut CommandRelay,
        now: I,
        actions: &mut Vec<ArbiterAction>,
    ) -> bool
    where
        I: Copy + Sub<Output = Duration>,
    {
        if self.state != TurnState::Granted {
            return false;
        }

        let heartbeat_timeout = self.heartbeat_timeout;
        let Some(holder) = queue.holder_mut() else {
            return false;
        };
        let session_id = holder.id();

        if let (Some(timeout), Some(&last)) = (heartbeat_timeout, holder.last_heartbeat_at()) {
            let elapsed = now - last;
            if elapsed > timeout {
                actions.push(ArbiterAction::Warning(ArbiterError::StaleConnection {
                    session_id,
                    elapsed,
                }));
                self.expire(queue, relay, ExpiryReason::HeartbeatLost, actions);
                return true;
            }
        }

        let time_remaining = holder.time_remaining().saturating_sub(1);
        holder.set_time_remaining(time_remaining);
        actions.push(ArbiterAction::Countdown { session_id, time_remaining });

        if time_remaining == 0 {
            self.expire(queue, relay, ExpiryReason::TimeUp, actions);
            return true;
        }

        false
    }

    /// Record a holder heartbeat.
    ///
    /// # Errors
    ///
    /// `NotHolder` if `session_id` does not hold control.
    pub fn heartbeat<I>(
        &mut self,
        queue: &mut TurnQueue<I>,
        session_id: SessionId,
        reported: i64,
        now: I,
        actions: &mut Vec<ArbiterAction>,
    ) -> Result<(), ArbiterError> {
        let holder_id = queue.holder_id();
        let holder = queue
            .holder_mut()
            .filter(|h| h.id() == session_id)
            .ok_or(ArbiterError::NotHolder { session_id, holder: holder_id })?;

        holder.set_last_heartbeat_at(Some(now));

        let authoritative = holder.time_remaining();
        if reported.abs_diff(i64::from(authoritative)) > u64::from(self.drift_tolerance) {
            actions.push(ArbiterAction::Diverged { session_id, reported, authoritative });
        }

        Ok(())
    }

    /// Apply a new allowance to the running countdown.
    ///
    /// The remaining time never exceeds the allowance.
    pub fn reconcile_allowance<I>(
        &mut self,
        queue: &mut TurnQueue<I>,
        session_id: SessionId,
        actions: &mut Vec<ArbiterAction>,
    ) {
        let Some(holder) = queue.holder_mut().filter(|h| h.id() == session_id) else {
            return;
        };

        if holder.time_remaining() > holder.time_allowed() {
            let time_remaining = holder.time_allowed();
            holder.set_time_remaining(time_remaining);
            actions.push(ArbiterAction::Countdown { session_id, time_remaining });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(n: u64) -> SessionId {
        SessionId::new(n)
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn setup(ids: &[u64]) -> (TurnScheduler, TurnQueue<Duration>, CommandRelay) {
        let config = ArbiterConfig::default();
        let mut queue = TurnQueue::new();
        for &id in ids {
            queue.enqueue(sid(id), 30);
        }
        (TurnScheduler::new(&config), queue, CommandRelay::new(config.deadband_step))
    }

    #[test]
    fn promote_grants_head_with_full_allowance() {
        let (mut sched, mut queue, _) = setup(&[1, 2]);
        let mut actions = Vec::new();

        assert_eq!(sched.promote(&mut queue, secs(0), &mut actions), Some(sid(1)));
        assert_eq!(sched.state(), TurnState::Granted);
        assert_eq!(queue.current_index(), Some(0));
        assert_eq!(queue.holder().unwrap().time_remaining(), 30);
        assert_eq!(actions, vec![ArbiterAction::Granted { session_id: sid(1), time_allowed: 30 }]);

        // Already granted
        assert_eq!(sched.promote(&mut queue, secs(0), &mut actions), None);
    }

    #[test]
    fn expire_stops_before_revoking_and_dequeues() {
        let (mut sched, mut queue, mut relay) = setup(&[1, 2]);
        let mut actions = Vec::new();
        sched.promote(&mut queue, secs(0), &mut actions);
        actions.clear();

        let former = sched.expire(&mut queue, &mut relay, ExpiryReason::Released, &mut actions);
        assert_eq!(former.map(|s| s.id()), Some(sid(1)));
        assert_eq!(actions, vec![
            ArbiterAction::Actuate { command: wheelhouse_proto::DriveCommand::NEUTRAL, emergency: false },
            ArbiterAction::Revoked { session_id: sid(1), reason: ExpiryReason::Released },
        ]);
        assert_eq!(sched.state(), TurnState::Idle);
        assert_eq!(queue.current_index(), None);
        assert!(!queue.contains(sid(1)));
    }

    #[test]
    fn emergency_expiry_keeps_position_and_freezes() {
        let (mut sched, mut queue, mut relay) = setup(&[1, 2]);
        let mut actions = Vec::new();
        sched.promote(&mut queue, secs(0), &mut actions);

        sched.expire(&mut queue, &mut relay, ExpiryReason::EmergencyStop, &mut actions);
        assert!(sched.is_frozen());
        assert_eq!(queue.position_of(sid(1)), Some(0));
        assert_eq!(queue.current_index(), None);
        assert_eq!(sched.promote(&mut queue, secs(1), &mut actions), None);

        assert!(sched.unfreeze());
        assert_eq!(sched.promote(&mut queue, secs(1), &mut actions), Some(sid(1)));
    }

    #[test]
    fn expire_without_holder_is_noop() {
        let (mut sched, mut queue, mut relay) = setup(&[1]);
        let mut actions = Vec::new();
        assert!(sched.expire(&mut queue, &mut relay, ExpiryReason::ForcedNext, &mut actions).is_none());
        assert!(actions.is_empty());
        assert_eq!(relay.stats().stops, 0);
    }

    #[test]
    fn tick_counts_down_to_expiry() {
        let (mut sched, mut queue, mut relay) = setup(&[1]);
        queue.update_time_allowed(sid(1), 10, &ArbiterConfig::default().time).unwrap();
        let mut actions = Vec::new();
        sched.promote(&mut queue, secs(0), &mut actions);

        for t in 1..10 {
            let mut ticked = Vec::new();
            sched.heartbeat(&mut queue, sid(1), 10 - t as i64, secs(t), &mut ticked).unwrap();
            assert!(!sched.tick(&mut queue, &mut relay, secs(t), &mut ticked));
            assert_eq!(ticked, vec![ArbiterAction::Countdown {
                session_id: sid(1),
                time_remaining: 10 - t as u32,
            }]);
        }

        let mut last = Vec::new();
        assert!(sched.tick(&mut queue, &mut relay, secs(10), &mut last));
        assert!(last.contains(&ArbiterAction::Revoked {
            session_id: sid(1),
            reason: ExpiryReason::TimeUp
        }));
        assert!(queue.is_empty());
    }

    #[test]
    fn silent_holder_is_revoked() {
        let (mut sched, mut queue, mut relay) = setup(&[1, 2]);
        let mut actions = Vec::new();
        sched.promote(&mut queue, secs(0), &mut actions);

        // Timeout is 3 ticks; exactly 3s of silence is still alive
        for t in 1..=3 {
            assert!(!sched.tick(&mut queue, &mut relay, secs(t), &mut actions));
        }

        let mut actions = Vec::new();
        assert!(sched.tick(&mut queue, &mut relay, secs(4), &mut actions));
        assert!(matches!(actions[0], ArbiterAction::Warning(ArbiterError::StaleConnection { .. })));
        assert!(actions.contains(&ArbiterAction::Revoked {
            session_id: sid(1),
            reason: ExpiryReason::HeartbeatLost
        }));
    }

    #[test]
    fn zero_misses_never_times_out() {
        let config = ArbiterConfig { heartbeat_misses: 0, ..ArbiterConfig::default() };
        let mut sched = TurnScheduler::new(&config);
        let mut queue = TurnQueue::new();
        let mut relay = CommandRelay::new(5);
        queue.enqueue(sid(1), 30);

        let mut actions = Vec::new();
        sched.promote(&mut queue, secs(0), &mut actions);
        for t in 1..20 {
            assert!(!sched.tick(&mut queue, &mut relay, secs(t * 10), &mut actions));
        }
        assert_eq!(queue.holder().unwrap().time_remaining(), 11);
    }

    #[test]
    fn heartbeat_reports_divergence_without_changing_countdown() {
        let (mut sched, mut queue, _) = setup(&[1, 2]);
        let mut actions = Vec::new();
        sched.promote(&mut queue, secs(0), &mut actions);
        actions.clear();

        sched.heartbeat(&mut queue, sid(1), 28, secs(1), &mut actions).unwrap();
        assert!(actions.is_empty());

        sched.heartbeat(&mut queue, sid(1), 5, secs(1), &mut actions).unwrap();
        assert_eq!(actions, vec![ArbiterAction::Diverged {
            session_id: sid(1),
            reported: 5,
            authoritative: 30
        }]);
        assert_eq!(queue.holder().unwrap().time_remaining(), 30);

        let err = sched.heartbeat(&mut queue, sid(2), 30, secs(1), &mut actions).unwrap_err();
        assert_eq!(err, ArbiterError::NotHolder { session_id: sid(2), holder: Some(sid(1)) });
    }

    #[test]
    fn reconcile_clamps_remaining_time() {
        let (mut sched, mut queue, _) = setup(&[1]);
        let mut actions = Vec::new();
        sched.promote(&mut queue, secs(0), &mut actions);
        actions.clear();

        queue.update_time_allowed(sid(1), 10, &ArbiterConfig::default().time).unwrap();
        sched.reconcile_allowance(&mut queue, sid(1), &mut actions);
        assert_eq!(queue.holder().unwrap().time_remaining(), 10);
        assert_eq!(actions, vec![ArbiterAction::Countdown { session_id: sid(1), time_remaining: 10 }]);
    }
}
