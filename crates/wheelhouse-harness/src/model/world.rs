//! Model world: participant connections plus the reference arbiter.
//!
//! The world is the oracle against which the real server is verified.

use wheelhouse_core::ArbiterConfig;

use super::{
    arbiter::ModelArbiter,
    operation::{ClientId, Operation, OperationError, OperationResult},
};

/// Observable state for oracle comparison.
///
/// This is the subset of server state a client or admin can see on the
/// wire, keyed by participant rather than by session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableState {
    /// Queue order.
    pub queue: Vec<ClientId>,
    /// Allowance per queue entry, same order.
    pub allowances: Vec<u32>,
    /// Current holder.
    pub holder: Option<ClientId>,
    /// Holder countdown.
    pub holder_remaining: Option<u32>,
    /// Promotion suspended.
    pub frozen: bool,
    /// Allowance for new arrivals.
    pub default_time_allowed: u32,
}

/// Model world - the reference implementation.
#[derive(Debug, Clone)]
pub struct ModelWorld {
    connected: Vec<bool>,
    arbiter: ModelArbiter,
}

impl ModelWorld {
    /// World with `num_clients` disconnected participants.
    pub fn new(num_clients: usize, config: &ArbiterConfig) -> Self {
        Self { connected: vec![false; num_clients], arbiter: ModelArbiter::new(config) }
    }

    /// Number of participants.
    pub fn num_clients(&self) -> usize {
        self.connected.len()
    }

    /// Whether a participant has an open connection.
    pub fn is_connected(&self, client: ClientId) -> bool {
        self.connected.get(usize::from(client)).copied().unwrap_or(false)
    }

    /// The reference arbiter.
    pub fn arbiter(&self) -> &ModelArbiter {
        &self.arbiter
    }

    /// Apply an operation and return the result.
    ///
    /// The result should match the real server's result.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        self.apply_inner(op).into()
    }

    fn apply_inner(&mut self, op: &Operation) -> Result<(), OperationError> {
        match *op {
            Operation::Connect { client } => {
                if self.is_connected(client) {
                    return Err(OperationError::AlreadyConnected);
                }
                self.set_connected(client, true);
                Ok(())
            },
            Operation::Disconnect { client } => {
                self.require_connected(client)?;
                self.set_connected(client, false);
                self.arbiter.disconnect(client);
                Ok(())
            },
            Operation::RequestControl { client } => {
                self.require_connected(client)?;
                self.arbiter.enqueue(client);
                Ok(())
            },
            Operation::EndTurn { client } => {
                self.require_connected(client)?;
                self.arbiter.release(client)
            },
            Operation::Heartbeat { client } => {
                self.require_connected(client)?;
                self.arbiter.heartbeat(client);
                Ok(())
            },
            Operation::Drive { client, .. } => {
                self.require_connected(client)?;
                self.arbiter.drive(client)
            },
            Operation::Tick => {
                self.arbiter.tick();
                Ok(())
            },
            Operation::ForceNext => {
                self.arbiter.force_next();
                Ok(())
            },
            Operation::EmergencyStop => {
                self.arbiter.emergency_stop();
                Ok(())
            },
            Operation::Resume => {
                self.arbiter.resume();
                Ok(())
            },
            Operation::RemoveUser { target } => self.arbiter.remove(target),
            Operation::UpdateUser { target, seconds } => {
                self.arbiter.update(target, u32::from(seconds))
            },
            Operation::SetDefaultTime { seconds } => self.arbiter.set_default(u32::from(seconds)),
            Operation::MoveUser { target, position } => {
                self.arbiter.move_to(target, usize::from(position))
            },
        }
    }

    fn require_connected(&self, client: ClientId) -> Result<(), OperationError> {
        if self.is_connected(client) { Ok(()) } else { Err(OperationError::NotConnected) }
    }

    fn set_connected(&mut self, client: ClientId, connected: bool) {
        if let Some(slot) = self.connected.get_mut(usize::from(client)) {
            *slot = connected;
        }
    }

    /// Extract observable state for comparison.
    pub fn observable_state(&self) -> ObservableState {
        let entries = self.arbiter.entries();
        let holder = self.arbiter.holder();
        let holder_remaining =
            holder.and_then(|h| entries.iter().find(|e| e.client == h)).map(|e| e.remaining);

        ObservableState {
            queue: entries.iter().map(|e| e.client).collect(),
            allowances: entries.iter().map(|e| e.allowed).collect(),
            holder,
            holder_remaining,
            frozen: self.arbiter.is_frozen(),
            default_time_allowed: self.arbiter.default_allowed(),
        }
    }
}
