//! Standard invariant checks.
//!
//! These invariants capture behavioral properties that must always hold.
//! They verify WHAT must be true, not specific test scenarios.

use std::collections::BTreeSet;

use super::{Invariant, InvariantResult, Milestone, SystemSnapshot, Violation};

/// The holder index, if any, points into the queue.
pub struct HolderIndexInBounds;

impl Invariant for HolderIndexInBounds {
    fn name(&self) -> &'static str {
        "holder_index_in_bounds"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        match state.current_index {
            Some(idx) if idx >= state.rows.len() => Err(Violation {
                invariant: self.name(),
                message: format!("current_index {idx} with {} queued", state.rows.len()),
            }),
            _ => Ok(()),
        }
    }
}

/// A holder always has time left, never more than its allowance.
///
/// A countdown that reaches zero expires the turn in the same tick, so a
/// holder at zero means an expiry was skipped.
pub struct HolderHasTime;

impl Invariant for HolderHasTime {
    fn name(&self) -> &'static str {
        "holder_has_time"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let Some(holder) = state.holder() else {
            return Ok(());
        };

        if holder.time_remaining == 0 || holder.time_remaining > holder.time_allowed {
            return Err(Violation {
                invariant: self.name(),
                message: format!(
                    "holder {} has {}s of {}s",
                    holder.sid, holder.time_remaining, holder.time_allowed
                ),
            });
        }
        Ok(())
    }
}

/// Only the holder has a running countdown.
pub struct WaitingHaveNoTime;

impl Invariant for WaitingHaveNoTime {
    fn name(&self) -> &'static str {
        "waiting_have_no_time"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for (idx, row) in state.rows.iter().enumerate() {
            if Some(idx) != state.current_index && row.time_remaining != 0 {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "waiting session {} at {idx} shows {}s remaining",
                        row.sid, row.time_remaining
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Promotion is suspended while frozen, so nobody holds control.
pub struct FrozenMeansNoHolder;

impl Invariant for FrozenMeansNoHolder {
    fn name(&self) -> &'static str {
        "frozen_means_no_holder"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        if state.frozen && state.current_index.is_some() {
            return Err(Violation {
                invariant: self.name(),
                message: format!("frozen with holder at {:?}", state.current_index),
            });
        }
        Ok(())
    }
}

/// Every allowance lies within the configured bounds.
pub struct AllowancesWithinBounds;

impl Invariant for AllowancesWithinBounds {
    fn name(&self) -> &'static str {
        "allowances_within_bounds"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let bounds = state.min_time_allowed..=state.max_time_allowed;
        match state.rows.iter().find(|row| !bounds.contains(&row.time_allowed)) {
            Some(row) => Err(Violation {
                invariant: self.name(),
                message: format!(
                    "session {} allowed {}s outside {}..={}",
                    row.sid, row.time_allowed, state.min_time_allowed, state.max_time_allowed
                ),
            }),
            None => Ok(()),
        }
    }
}

/// A session appears in the queue at most once.
pub struct UniqueSessions;

impl Invariant for UniqueSessions {
    fn name(&self) -> &'static str {
        "unique_sessions"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let mut seen = BTreeSet::new();
        for row in &state.rows {
            if !seen.insert(row.sid) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("session {} queued twice", row.sid),
                });
            }
        }
        Ok(())
    }
}

/// Every grant was delivered as exactly one `timestart`.
pub struct GrantsDelivered;

impl Invariant for GrantsDelivered {
    fn name(&self) -> &'static str {
        "grants_delivered"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let delivered =
            state.milestones.iter().filter(|m| matches!(m, Milestone::Grant(_))).count() as u64;

        if delivered != state.turns_granted {
            return Err(Violation {
                invariant: self.name(),
                message: format!(
                    "{} turns granted, {delivered} timestart messages",
                    state.turns_granted
                ),
            });
        }
        Ok(())
    }
}

/// The vehicle is stopped between one turn and the next.
///
/// Only checked when an actuator was attached for the whole run; otherwise
/// stops had nowhere to go.
pub struct StopBeforeEveryGrant;

impl Invariant for StopBeforeEveryGrant {
    fn name(&self) -> &'static str {
        "stop_before_every_grant"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        if !state.actuator_continuous {
            return Ok(());
        }

        let mut previous: Option<wheelhouse_proto::SessionId> = None;
        let mut stopped = true;
        for milestone in &state.milestones {
            match milestone {
                Milestone::Stop => stopped = true,
                Milestone::Grant(session_id) => {
                    if !stopped {
                        return Err(Violation {
                            invariant: self.name(),
                            message: format!(
                                "{session_id} granted after {previous:?} with no stop between"
                            ),
                        });
                    }
                    previous = Some(*session_id);
                    stopped = false;
                },
            }
        }
        Ok(())
    }
}
