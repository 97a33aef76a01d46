//! Arbitration configuration.

use std::time::Duration;

use wheelhouse_proto::TimingConfig;

use crate::error::{ArbiterError, ConfigError};

/// Shortest turn an admin may configure, in seconds.
pub const MIN_TIME_ALLOWED: u32 = 10;

/// Longest turn an admin may configure, in seconds.
pub const MAX_TIME_ALLOWED: u32 = 3000;

/// Turn length given to sessions when no admin has changed it.
pub const DEFAULT_TIME_ALLOWED: u32 = 90;

/// Scheduler tick; one tick is one countdown second.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Ticks without a holder heartbeat before the turn is revoked.
pub const DEFAULT_HEARTBEAT_MISSES: u32 = 3;

/// Quantization step for command percentages.
pub const DEFAULT_DEADBAND_STEP: u8 = 5;

/// Seconds a client-reported countdown may differ before it is flagged.
pub const DEFAULT_DRIFT_TOLERANCE: u32 = 2;

/// Turn allowance bounds and default. Mutated only by the admin plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalConfig {
    /// Allowance for newly admitted sessions
    pub default_time_allowed: u32,
    /// Lower bound for any allowance
    pub min_time_allowed: u32,
    /// Upper bound for any allowance
    pub max_time_allowed: u32,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_time_allowed: DEFAULT_TIME_ALLOWED,
            min_time_allowed: MIN_TIME_ALLOWED,
            max_time_allowed: MAX_TIME_ALLOWED,
        }
    }
}

impl GlobalConfig {
    /// Check an allowance against the bounds.
    ///
    /// # Errors
    ///
    /// `OutOfRange` if `seconds` is outside `[min, max]`.
    pub fn validate(&self, seconds: i64) -> Result<u32, ArbiterError> {
        let in_range = seconds >= i64::from(self.min_time_allowed)
            && seconds <= i64::from(self.max_time_allowed);

        if in_range {
            // Bounded by max_time_allowed, which is a u32
            Ok(seconds as u32)
        } else {
            Err(ArbiterError::OutOfRange {
                value: seconds,
                min: self.min_time_allowed,
                max: self.max_time_allowed,
            })
        }
    }

    /// Wire form for snapshots.
    pub fn timing(&self) -> TimingConfig {
        TimingConfig {
            default_time_allowed: self.default_time_allowed,
            min_time_allowed: self.min_time_allowed,
            max_time_allowed: self.max_time_allowed,
        }
    }
}

/// Everything the arbiter needs to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbiterConfig {
    /// Allowance bounds and default
    pub time: GlobalConfig,
    /// Scheduler tick interval
    pub tick_interval: Duration,
    /// Missed ticks before a silent holder is revoked; 0 disables the check
    pub heartbeat_misses: u32,
    /// Command quantization step in percent
    pub deadband_step: u8,
    /// Allowed divergence between client and server countdowns, in seconds
    pub drift_tolerance: u32,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            time: GlobalConfig::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            heartbeat_misses: DEFAULT_HEARTBEAT_MISSES,
            deadband_step: DEFAULT_DEADBAND_STEP,
            drift_tolerance: DEFAULT_DRIFT_TOLERANCE,
        }
    }
}

impl ArbiterConfig {
    /// Silence after which the holder is considered gone.
    pub fn heartbeat_timeout(&self) -> Option<Duration> {
        if self.heartbeat_misses == 0 {
            None
        } else {
            Some(self.tick_interval.saturating_mul(self.heartbeat_misses))
        }
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] describing the first inconsistency found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let time = &self.time;
        if time.min_time_allowed > time.max_time_allowed {
            return Err(ConfigError::InvalidBounds {
                min: time.min_time_allowed,
                max: time.max_time_allowed,
            });
        }

        time.validate(i64::from(time.default_time_allowed))
            .map_err(ConfigError::DefaultOutOfRange)?;

        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroTickInterval);
        }

        if !(1..=100).contains(&self.deadband_step) {
            return Err(ConfigError::InvalidDeadband(self.deadband_step));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ArbiterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.heartbeat_timeout(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn zero_misses_disables_heartbeat_check() {
        let config = ArbiterConfig { heartbeat_misses: 0, ..ArbiterConfig::default() };
        assert_eq!(config.heartbeat_timeout(), None);
    }

    #[test]
    fn validate_bounds_are_inclusive() {
        let time = GlobalConfig::default();
        assert_eq!(time.validate(10), Ok(10));
        assert_eq!(time.validate(3000), Ok(3000));
        assert!(time.validate(9).is_err());
        assert!(time.validate(3001).is_err());
        assert!(time.validate(-1).is_err());
        assert!(time.validate(i64::MAX).is_err());
    }

    #[test]
    fn rejects_inconsistent_configs() {
        let bad_default = ArbiterConfig {
            time: GlobalConfig { default_time_allowed: 5, ..GlobalConfig::default() },
            ..ArbiterConfig::default()
        };
        assert!(matches!(bad_default.validate(), Err(ConfigError::DefaultOutOfRange(_))));

        let bad_bounds = ArbiterConfig {
            time: GlobalConfig {
                default_time_allowed: 50,
                min_time_allowed: 100,
                max_time_allowed: 20,
            },
            ..ArbiterConfig::default()
        };
        assert!(matches!(bad_bounds.validate(), Err(ConfigError::InvalidBounds { .. })));

        let zero_tick =
            ArbiterConfig { tick_interval: Duration::ZERO, ..ArbiterConfig::default() };
        assert_eq!(zero_tick.validate(), Err(ConfigError::ZeroTickInterval));

        let no_deadband = ArbiterConfig { deadband_step: 0, ..ArbiterConfig::default() };
        assert_eq!(no_deadband.validate(), Err(ConfigError::InvalidDeadband(0)));
    }
}
