//! Wheelhouse arbitration core.
//!
//! Decides which client controls the vehicle, for how long, and which
//! commands reach it. Pure state machines with no I/O: callers pass the
//! current time in and get back [`ArbiterAction`]s to execute. The server
//! driver runs them against real sockets; the simulation harness runs them
//! against a virtual clock.
//!
//! # Components
//!
//! - [`TurnQueue`]: FIFO membership and ordering
//! - [`TurnScheduler`]: `Idle -> Granted -> Expiring -> Idle`, countdown,
//!   heartbeat liveness, emergency freeze
//! - [`CommandRelay`]: holder authorization, normalization, deadband, dedup,
//!   unconditional stops
//! - [`Arbiter`]: all of the above behind one API, plus the admin plane

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod admin;
pub mod arbiter;
pub mod config;
pub mod env;
pub mod error;
pub mod queue;
pub mod relay;
pub mod scheduler;
pub mod session;

pub use arbiter::{Arbiter, ArbiterAction};
pub use config::{ArbiterConfig, GlobalConfig};
pub use env::Environment;
pub use error::{ArbiterError, ConfigError};
pub use queue::{Admission, Removal, TurnQueue};
pub use relay::{CommandRelay, RelayStats};
pub use scheduler::{ExpiryReason, TurnScheduler, TurnState};
pub use session::Session;
