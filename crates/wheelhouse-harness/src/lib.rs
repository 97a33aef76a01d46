//! Deterministic simulation harness for the Wheelhouse arbitration server.
//!
//! A virtual-clock [`SimEnv`] and a [`SimServer`] that drives the real
//! `ServerDriver` without sockets, so whole sessions replay identically
//! from a seed.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a reference implementation for model-based
//! testing. Operations are applied to both the model and real server, and
//! their observable states are compared.
//!
//! # Invariant Testing
//!
//! The `invariants` module provides behavioral testing through invariant
//! checks. Invariants verify WHAT must be true across all execution paths, not
//! specific scenarios. Use [`InvariantRegistry::standard()`] for the
//! arbitration invariants.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod model;
pub mod sim_env;
pub mod sim_server;

pub use invariants::{
    AllowancesWithinBounds, FrozenMeansNoHolder, GrantsDelivered, HolderHasTime,
    HolderIndexInBounds, Invariant, InvariantRegistry, InvariantResult, Milestone,
    StopBeforeEveryGrant, SystemSnapshot, UniqueSessions, Violation, WaitingHaveNoTime,
};
pub use model::{
    ClientId, ModelArbiter, ModelEntry, ModelWorld, ObservableState, Operation, OperationError,
    OperationResult,
};
pub use sim_env::{SimEnv, SimInstant};
pub use sim_server::SimServer;
