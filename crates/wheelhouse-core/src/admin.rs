//! Admin control plane.
//!
//! Privileged operations that change queue and turn state out of band. Every
//! successful mutation ends with a [`ArbiterAction::Notice`] and a
//! [`ArbiterAction::QueueChanged`], so observers always see the outcome. The
//! emergency stop is the exception: whether it reached the vehicle is only
//! known where actuators are tracked, so its notice is written there from
//! [`ArbiterAction::EmergencyStopped`].
//! Authorization (is this connection an admin?) is the driver's concern.

use std::{ops::Sub, time::Duration};

use wheelhouse_proto::SessionId;

use crate::{
    arbiter::{Arbiter, ArbiterAction},
    error::ArbiterError,
    scheduler::ExpiryReason,
};

impl<I> Arbiter<I>
where
    I: Copy + Sub<Output = Duration>,
{
    /// Change one session's allowance.
    ///
    /// For the holder, the remaining time is clamped to the new allowance
    /// immediately; raising the allowance does not extend a running turn.
    ///
    /// # Errors
    ///
    /// - `OutOfRange` if `seconds` is outside the configured bounds
    /// - `NotFound` if the session is not queued
    pub fn update_session(
        &mut self,
        session_id: SessionId,
        seconds: i64,
    ) -> Result<Vec<ArbiterAction>, ArbiterError> {
        let seconds = self.queue.update_time_allowed(session_id, seconds, &self.config.time)?;

        let mut actions = Vec::new();
        self.scheduler.reconcile_allowance(&mut self.queue, session_id, &mut actions);

        if let Some(session) = self.queue.get(session_id) {
            actions.push(ArbiterAction::SessionUpdated(session.row()));
        }
        actions.push(ArbiterAction::Notice(format!(
            "Set time allowed for {session_id} to {seconds}s"
        )));
        actions.push(ArbiterAction::QueueChanged);
        Ok(actions)
    }

    /// Remove a session. Removing the holder expires its turn first.
    ///
    /// # Errors
    ///
    /// `NotFound` if the session is not queued.
    pub fn remove_session(
        &mut self,
        session_id: SessionId,
        now: I,
    ) -> Result<Vec<ArbiterAction>, ArbiterError> {
        let mut actions = Vec::new();

        if self.queue.holder_id() == Some(session_id) {
            self.scheduler.expire(
                &mut self.queue,
                &mut self.relay,
                ExpiryReason::Removed,
                &mut actions,
            );
        } else {
            self.queue.remove(session_id)?;
            actions.push(ArbiterAction::SessionRemoved(session_id));
        }

        actions.push(ArbiterAction::Notice(format!("Removed {session_id} from the queue")));
        self.settle(now, true, &mut actions);
        Ok(actions)
    }

    /// Expire the holder (if any) and promote the next session.
    ///
    /// Also lifts an emergency freeze.
    pub fn force_next(&mut self, now: I) -> Vec<ArbiterAction> {
        let mut actions = Vec::new();

        let expired = self
            .scheduler
            .expire(&mut self.queue, &mut self.relay, ExpiryReason::ForcedNext, &mut actions)
            .is_some();

        if self.scheduler.unfreeze() {
            actions.push(ArbiterAction::Resumed);
        }

        let message = if expired { "Skipped to next user" } else { "No active user to skip" };
        actions.push(ArbiterAction::Notice(message.to_string()));
        self.settle(now, expired, &mut actions);
        actions
    }

    /// Stop the vehicle now.
    ///
    /// Always issues an emergency stop, holder or not. The holder loses
    /// control but keeps its queue position; promotion stays frozen until
    /// `force_next`, `resume` or a new arrival.
    pub fn emergency_stop(&mut self) -> Vec<ArbiterAction> {
        let mut actions = Vec::new();

        let holder = self
            .scheduler
            .expire(&mut self.queue, &mut self.relay, ExpiryReason::EmergencyStop, &mut actions)
            .map(|session| session.id());

        if holder.is_none() {
            let command = self.relay.force_stop();
            actions.push(ArbiterAction::Actuate { command, emergency: true });
            self.scheduler.freeze();
        }

        actions.push(ArbiterAction::EmergencyStopped { holder });
        actions.push(ArbiterAction::QueueChanged);
        actions
    }

    /// Change the allowance for sessions admitted from now on.
    ///
    /// # Errors
    ///
    /// `OutOfRange` if `seconds` is outside the configured bounds.
    pub fn set_default_time_allowed(
        &mut self,
        seconds: i64,
    ) -> Result<Vec<ArbiterAction>, ArbiterError> {
        let seconds = self.config.time.validate(seconds)?;
        self.config.time.default_time_allowed = seconds;

        Ok(vec![
            ArbiterAction::Notice(format!("Default time set to {seconds} seconds")),
            ArbiterAction::QueueChanged,
        ])
    }

    /// Lift an emergency freeze and promote the head of the queue.
    pub fn resume(&mut self, now: I) -> Vec<ArbiterAction> {
        let mut actions = Vec::new();

        let was_frozen = self.scheduler.unfreeze();
        if was_frozen {
            actions.push(ArbiterAction::Resumed);
            actions.push(ArbiterAction::Notice("Scheduling resumed".to_string()));
        } else {
            actions.push(ArbiterAction::Notice("Scheduling was not frozen".to_string()));
        }

        self.settle(now, was_frozen, &mut actions);
        actions
    }

    /// Move a session to another queue position.
    ///
    /// The holder keeps control wherever it is moved; moving a waiting
    /// session to the head makes it next in line.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the session is not queued
    /// - `InvalidPosition` if `position >= len`
    pub fn move_session(
        &mut self,
        session_id: SessionId,
        position: usize,
    ) -> Result<Vec<ArbiterAction>, ArbiterError> {
        self.queue.move_to(session_id, position)?;

        Ok(vec![
            ArbiterAction::Notice(format!("Moved {session_id} to position {position}")),
            ArbiterAction::QueueChanged,
        ])
    }
}
