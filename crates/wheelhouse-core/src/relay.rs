//! Command relay: gates control commands to the current holder.
//!
//! Every command is normalized into a [`DriveCommand`] before it can reach
//! the actuator: percentages are clamped and quantized to the deadband step,
//! discrete directions become full-scale values, key events adjust one axis
//! of the last forwarded command. A normalized command identical to the last
//! forwarded one is dropped.
//!
//! Stops bypass all of this. [`CommandRelay::force_stop`] always produces a
//! neutral command and resets the dedup state, so the first command after a
//! stop is compared against neutral.

use wheelhouse_proto::{ArrowKey, ControlPayload, DriveCommand, KeyEvent, SessionId};

use crate::error::ArbiterError;

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Commands forwarded to the actuator
    pub forwarded: u64,
    /// Holder commands dropped as duplicates
    pub deduplicated: u64,
    /// Commands from sessions that do not hold control
    pub rejected: u64,
    /// Unconditional stops issued
    pub stops: u64,
}

/// Normalizes, deduplicates and authorizes control commands.
#[derive(Debug, Clone)]
pub struct CommandRelay {
    step: u8,
    last_forwarded: Option<DriveCommand>,
    stats: RelayStats,
}

impl CommandRelay {
    /// Relay quantizing to multiples of `step` percent.
    ///
    /// A step of zero is treated as one (no quantization).
    pub fn new(step: u8) -> Self {
        Self { step: step.max(1), last_forwarded: None, stats: RelayStats::default() }
    }

    /// Last command that reached the actuator.
    pub fn last_forwarded(&self) -> Option<DriveCommand> {
        self.last_forwarded
    }

    /// Diagnostic counters.
    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Authorize and normalize a command.
    ///
    /// Returns the command to forward, or `None` if it duplicates the last
    /// forwarded one.
    ///
    /// # Errors
    ///
    /// `NotHolder` if `sender` is not `holder`. Nothing is forwarded.
    pub fn submit(
        &mut self,
        sender: SessionId,
        holder: Option<SessionId>,
        payload: &ControlPayload,
    ) -> Result<Option<DriveCommand>, ArbiterError> {
        if holder != Some(sender) {
            self.stats.rejected += 1;
            return Err(ArbiterError::NotHolder { session_id: sender, holder });
        }

        let command = self.normalize(payload);
        if self.last_forwarded == Some(command) {
            self.stats.deduplicated += 1;
            return Ok(None);
        }

        self.last_forwarded = Some(command);
        self.stats.forwarded += 1;
        Ok(Some(command))
    }

    /// Neutral stop, issued regardless of dedup state.
    pub fn force_stop(&mut self) -> DriveCommand {
        self.last_forwarded = Some(DriveCommand::NEUTRAL);
        self.stats.stops += 1;
        DriveCommand::NEUTRAL
    }

    /// Canonical form of a payload.
    pub fn normalize(&self, payload: &ControlPayload) -> DriveCommand {
        match *payload {
            ControlPayload::Percent { throttle, steer } => DriveCommand {
                throttle: quantize(throttle, self.step),
                steer: quantize(steer, self.step),
            },
            ControlPayload::Discrete { throttle, turn } => DriveCommand {
                throttle: quantize(f64::from(throttle.percent()), self.step),
                steer: quantize(f64::from(turn.percent()), self.step),
            },
            ControlPayload::Key(key) => {
                let base = self.last_forwarded.unwrap_or(DriveCommand::NEUTRAL);
                apply_key(base, key)
            },
        }
    }
}

/// Clamp into `[-100, 100]` and round to the nearest multiple of `step`.
///
/// Non-finite input is treated as zero.
fn quantize(value: f64, step: u8) -> i8 {
    if !value.is_finite() {
        return 0;
    }

    let step = f64::from(step);
    let clamped = value.clamp(-100.0, 100.0);
    let snapped = ((clamped / step).round() * step).clamp(-100.0, 100.0);

    // In [-100, 100] after the clamp
    snapped as i8
}

/// Arrow keys drive at full scale; releasing a key zeroes its axis only if
/// that key was the one driving it.
fn apply_key(mut cmd: DriveCommand, key: KeyEvent) -> DriveCommand {
    let (axis, sign) = match key.key {
        ArrowKey::Up => (&mut cmd.throttle, 1),
        ArrowKey::Down => (&mut cmd.throttle, -1),
        ArrowKey::Left => (&mut cmd.steer, -1),
        ArrowKey::Right => (&mut cmd.steer, 1),
    };

    if key.pressed {
        *axis = 100 * sign;
    } else if axis.signum() == sign {
        *axis = 0;
    }

    cmd
}
