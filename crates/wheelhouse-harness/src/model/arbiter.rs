//! Reference arbiter.
//!
//! A deliberately naive FIFO with a holder index, counting time in whole
//! ticks. It knows nothing about actions, relays or the wire; it only tracks
//! who is queued, who holds control and how long they have left.

use wheelhouse_core::ArbiterConfig;

use super::operation::{ClientId, OperationError};

/// One queued participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelEntry {
    /// Participant
    pub client: ClientId,
    /// Allowance in seconds
    pub allowed: u32,
    /// Countdown; zero unless holding
    pub remaining: u32,
}

/// Queue, holder and freeze flag.
#[derive(Debug, Clone)]
pub struct ModelArbiter {
    entries: Vec<ModelEntry>,
    current: Option<usize>,
    frozen: bool,
    default_allowed: u32,
    min_allowed: u32,
    max_allowed: u32,
    /// Ticks the holder may go without a heartbeat; zero disables
    heartbeat_misses: u32,
    ticks_since_heartbeat: u32,
}

impl ModelArbiter {
    /// Empty arbiter with the same timing rules as `config`.
    pub fn new(config: &ArbiterConfig) -> Self {
        Self {
            entries: Vec::new(),
            current: None,
            frozen: false,
            default_allowed: config.time.default_time_allowed,
            min_allowed: config.time.min_time_allowed,
            max_allowed: config.time.max_time_allowed,
            heartbeat_misses: config.heartbeat_misses,
            ticks_since_heartbeat: 0,
        }
    }

    /// Queue in order.
    pub fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }

    /// Current holder.
    pub fn holder(&self) -> Option<ClientId> {
        self.current.map(|idx| self.entries[idx].client)
    }

    /// Promotion suspended.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Allowance given to newly queued participants.
    pub fn default_allowed(&self) -> u32 {
        self.default_allowed
    }

    /// Join the queue; repeated requests change nothing.
    pub fn enqueue(&mut self, client: ClientId) {
        if self.position(client).is_some() {
            return;
        }
        self.entries.push(ModelEntry { client, allowed: self.default_allowed, remaining: 0 });
        self.frozen = false;
        self.promote();
    }

    /// Holder ends its own turn.
    pub fn release(&mut self, client: ClientId) -> Result<(), OperationError> {
        if self.holder() != Some(client) {
            return Err(OperationError::NotHolder);
        }
        self.expire_and_remove();
        self.promote();
        Ok(())
    }

    /// Heartbeats from anyone but the holder are ignored.
    pub fn heartbeat(&mut self, client: ClientId) {
        if self.holder() == Some(client) {
            self.ticks_since_heartbeat = 0;
        }
    }

    /// Only the holder may drive.
    pub fn drive(&self, client: ClientId) -> Result<(), OperationError> {
        if self.holder() == Some(client) { Ok(()) } else { Err(OperationError::NotHolder) }
    }

    /// Connection gone: leave the queue wherever you are.
    pub fn disconnect(&mut self, client: ClientId) {
        if self.holder() == Some(client) {
            self.expire_and_remove();
        } else if let Some(position) = self.position(client) {
            self.remove_at(position);
        }
        self.promote();
    }

    /// One second of countdown, or a heartbeat expiry.
    pub fn tick(&mut self) {
        if let Some(idx) = self.current {
            self.ticks_since_heartbeat += 1;
            if self.heartbeat_misses > 0 && self.ticks_since_heartbeat > self.heartbeat_misses {
                self.expire_and_remove();
            } else {
                let entry = &mut self.entries[idx];
                entry.remaining = entry.remaining.saturating_sub(1);
                if entry.remaining == 0 {
                    self.expire_and_remove();
                }
            }
        }
        self.promote();
    }

    /// Admin skip; also lifts a freeze.
    pub fn force_next(&mut self) {
        if self.current.is_some() {
            self.expire_and_remove();
        }
        self.frozen = false;
        self.promote();
    }

    /// Holder keeps its place with no time; nobody is promoted until resumed.
    pub fn emergency_stop(&mut self) {
        if let Some(idx) = self.current.take() {
            self.entries[idx].remaining = 0;
        }
        self.frozen = true;
    }

    /// Lift the freeze.
    pub fn resume(&mut self) {
        self.frozen = false;
        self.promote();
    }

    /// Admin removal from any position.
    pub fn remove(&mut self, client: ClientId) -> Result<(), OperationError> {
        if self.holder() == Some(client) {
            self.expire_and_remove();
        } else {
            let position = self.position(client).ok_or(OperationError::NotFound)?;
            self.remove_at(position);
        }
        self.promote();
        Ok(())
    }

    /// Change an allowance; a running countdown only ever shrinks.
    pub fn update(&mut self, client: ClientId, seconds: u32) -> Result<(), OperationError> {
        self.check_bounds(seconds)?;
        let position = self.position(client).ok_or(OperationError::NotFound)?;

        let entry = &mut self.entries[position];
        entry.allowed = seconds;
        if self.current == Some(position) {
            entry.remaining = entry.remaining.min(seconds);
        }
        Ok(())
    }

    /// Change the allowance for later arrivals.
    pub fn set_default(&mut self, seconds: u32) -> Result<(), OperationError> {
        self.check_bounds(seconds)?;
        self.default_allowed = seconds;
        Ok(())
    }

    /// Reorder; the holder keeps control wherever it lands.
    pub fn move_to(&mut self, client: ClientId, position: usize) -> Result<(), OperationError> {
        let from = self.position(client).ok_or(OperationError::NotFound)?;
        if position >= self.entries.len() {
            return Err(OperationError::InvalidPosition);
        }

        let holder = self.holder();
        let entry = self.entries.remove(from);
        self.entries.insert(position, entry);
        self.current = holder.and_then(|h| self.position(h));
        Ok(())
    }

    fn check_bounds(&self, seconds: u32) -> Result<(), OperationError> {
        if (self.min_allowed..=self.max_allowed).contains(&seconds) {
            Ok(())
        } else {
            Err(OperationError::OutOfRange)
        }
    }

    fn position(&self, client: ClientId) -> Option<usize> {
        self.entries.iter().position(|e| e.client == client)
    }

    fn expire_and_remove(&mut self) {
        if let Some(idx) = self.current.take() {
            self.entries.remove(idx);
        }
    }

    fn remove_at(&mut self, position: usize) {
        self.entries.remove(position);
        self.current = match self.current {
            Some(cur) if cur > position => Some(cur - 1),
            other => other,
        };
    }

    fn promote(&mut self) {
        if self.frozen || self.current.is_some() {
            return;
        }
        if let Some(head) = self.entries.first_mut() {
            head.remaining = head.allowed;
            self.current = Some(0);
            self.ticks_since_heartbeat = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ModelArbiter {
        ModelArbiter::new(&ArbiterConfig::default())
    }

    #[test]
    fn fifo_with_single_holder() {
        let mut arb = model();
        arb.enqueue(0);
        arb.enqueue(1);
        arb.enqueue(0);

        assert_eq!(arb.holder(), Some(0));
        assert_eq!(arb.entries().len(), 2);

        arb.release(0).unwrap();
        assert_eq!(arb.holder(), Some(1));
        assert_eq!(arb.entries()[0].remaining, 90);
    }

    #[test]
    fn silent_holder_expires_after_misses() {
        let mut arb = model();
        arb.enqueue(0);
        arb.enqueue(1);

        arb.tick();
        arb.tick();
        arb.tick();
        assert_eq!(arb.holder(), Some(0));

        arb.tick();
        assert_eq!(arb.holder(), Some(1));
    }

    #[test]
    fn emergency_stop_keeps_place_until_resume() {
        let mut arb = model();
        arb.enqueue(0);
        arb.enqueue(1);
        arb.emergency_stop();

        assert_eq!(arb.holder(), None);
        arb.tick();
        assert_eq!(arb.holder(), None);

        arb.resume();
        assert_eq!(arb.holder(), Some(0));
        assert_eq!(arb.entries()[0].remaining, 90);
    }

    #[test]
    fn update_checks_range_before_membership() {
        let mut arb = model();
        assert_eq!(arb.update(7, 5), Err(OperationError::OutOfRange));
        assert_eq!(arb.update(7, 50), Err(OperationError::NotFound));
    }
}
