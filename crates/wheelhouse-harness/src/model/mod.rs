//! Model-based testing.
//!
//! [`ModelWorld`] is a small reference implementation of turn arbitration.
//! Tests apply the same random [`Operation`] sequence to the model and to a
//! [`SimServer`](crate::SimServer) and compare [`ObservableState`] after
//! every step.

mod arbiter;
mod operation;
mod world;

pub use arbiter::{ModelArbiter, ModelEntry};
pub use operation::{ClientId, Operation, OperationError, OperationResult};
pub use world::{ModelWorld, ObservableState};
