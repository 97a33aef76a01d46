//! Simulated environment: virtual clock and seeded randomness.
//!
//! Time only moves when a test moves it, and session ids come from a
//! ChaCha stream seeded per run, so a failing seed replays exactly.

use std::{
    fmt,
    ops::Sub,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use wheelhouse_core::env::Environment;

/// Wall-clock origin reported by [`SimEnv::wall_clock_secs`]
/// (2024-01-01T00:00:00Z).
pub const SIM_EPOCH_SECS: u64 = 1_704_067_200;

/// Point on the virtual timeline, measured from simulation start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimInstant(Duration);

impl SimInstant {
    /// Time since the simulation started.
    pub fn since_start(self) -> Duration {
        self.0
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, earlier: Self) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

struct SimState {
    seed: u64,
    elapsed_nanos: AtomicU64,
    rng: Mutex<ChaCha8Rng>,
}

/// Deterministic environment shared by every clone.
#[derive(Clone)]
pub struct SimEnv {
    state: Arc<SimState>,
}

impl SimEnv {
    /// Environment seeded with 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with its own RNG seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: Arc::new(SimState {
                seed,
                elapsed_nanos: AtomicU64::new(0),
                rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            }),
        }
    }

    /// Seed this environment was created with.
    pub fn seed(&self) -> u64 {
        self.state.seed
    }

    /// Move the virtual clock forward.
    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.state.elapsed_nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    /// Virtual time since start.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.state.elapsed_nanos.load(Ordering::SeqCst))
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimEnv")
            .field("seed", &self.state.seed)
            .field("elapsed", &self.elapsed())
            .finish_non_exhaustive()
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(self.elapsed())
    }

    fn wall_clock_secs(&self) -> u64 {
        SIM_EPOCH_SECS + self.elapsed().as_secs()
    }

    /// Sleeping advances virtual time and completes immediately.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.state.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}
