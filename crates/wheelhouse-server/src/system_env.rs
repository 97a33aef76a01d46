//! Production environment: OS clocks and OS entropy.
//!
//! Time advances on its own and session ids are unpredictable, so production
//! runs are not reproducible. Use the harness `SimEnv` for that.

use std::time::Duration;

use wheelhouse_core::env::Environment;

/// Production environment using system time and cryptographic RNG.
///
/// Monotonic `std::time::Instant` drives the scheduler; the wall clock is
/// read only for admin notification timestamps.
///
/// # Panics
///
/// Panics if the OS RNG fails. Session ids are the only client credential,
/// so a server without working entropy must not hand any out.
#[derive(Debug, Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    #[allow(clippy::disallowed_methods)]
    fn wall_clock_secs(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs())
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - session ids would be guessable");
    }
}
