//! Control command payloads.
//!
//! Three encodings reach the server, depending on client vintage:
//!
//! - percent pair `{"t": -100..100, "s": -100..100}` (joystick and bars)
//! - direction pair `{"throttle": "forward", "turn": "left"}` (buttons),
//!   optionally sized by `throttle_percent`/`turn_percent` (unsigned) or
//!   `throttleValue`/`turnValue` (signed); a numeric `throttle` or `turn`
//!   such as `"50"` is a signed percentage on its own
//! - legacy key string `"UP pressed"` (arrow keys)
//!
//! All of them decode into [`ControlPayload`]. Normalization into a
//! [`DriveCommand`] (clamping, deadband, key merging) is relay policy and
//! lives in the core crate.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    envelope::events,
    errors::{ProtocolError, Result},
};

/// Longitudinal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Throttle {
    /// Drive forward
    Forward,
    /// Drive backward
    Backward,
    /// No drive
    Stop,
}

impl Throttle {
    /// Full-scale percentage for this direction.
    pub const fn percent(self) -> i8 {
        match self {
            Self::Forward => 100,
            Self::Backward => -100,
            Self::Stop => 0,
        }
    }

    /// Direction implied by a signed percentage.
    pub const fn from_percent(percent: i8) -> Self {
        if percent > 0 {
            Self::Forward
        } else if percent < 0 {
            Self::Backward
        } else {
            Self::Stop
        }
    }
}

/// Lateral direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Turn {
    /// Steer left
    Left,
    /// Steer right
    Right,
    /// Wheels straight
    #[serde(rename = "none")]
    Straight,
}

impl Turn {
    /// Full-scale percentage for this direction (left is negative).
    pub const fn percent(self) -> i8 {
        match self {
            Self::Left => -100,
            Self::Right => 100,
            Self::Straight => 0,
        }
    }

    /// Direction implied by a signed percentage.
    pub const fn from_percent(percent: i8) -> Self {
        if percent > 0 {
            Self::Right
        } else if percent < 0 {
            Self::Left
        } else {
            Self::Straight
        }
    }
}

/// Arrow key named by a legacy key command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrowKey {
    /// Forward
    Up,
    /// Backward
    Down,
    /// Steer left
    Left,
    /// Steer right
    Right,
}

impl ArrowKey {
    fn as_str(self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
        }
    }
}

/// Legacy key command: one arrow key going down or up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyEvent {
    /// Which key
    pub key: ArrowKey,
    /// `true` for `pressed`, `false` for `released`
    pub pressed: bool,
}

impl fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = if self.pressed { "pressed" } else { "released" };
        write!(f, "{} {}", self.key.as_str(), action)
    }
}

impl FromStr for KeyEvent {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let unknown = || ProtocolError::UnknownKeyCommand(s.to_string());

        let mut parts = s.split_whitespace();
        let (Some(key), Some(action), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(unknown());
        };

        let key = match key.to_ascii_uppercase().as_str() {
            "UP" => ArrowKey::Up,
            "DOWN" => ArrowKey::Down,
            "LEFT" => ArrowKey::Left,
            "RIGHT" => ArrowKey::Right,
            _ => return Err(unknown()),
        };

        let pressed = match action.to_ascii_lowercase().as_str() {
            "pressed" => true,
            "released" => false,
            _ => return Err(unknown()),
        };

        Ok(Self { key, pressed })
    }
}

/// A decoded control command, before normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlPayload {
    /// Analog percentages; values may be out of range or fractional
    Percent {
        /// Throttle, positive is forward
        throttle: f64,
        /// Steering, positive is right
        steer: f64,
    },
    /// Button directions
    Discrete {
        /// Longitudinal direction
        throttle: Throttle,
        /// Lateral direction
        turn: Turn,
    },
    /// One arrow key transition
    Key(KeyEvent),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireControl {
    Percent { t: f64, s: f64 },
    Directions(WireDirections),
    Legacy(String),
}

#[derive(Deserialize)]
struct WireDirections {
    throttle: WireAxis<Throttle>,
    turn: WireAxis<Turn>,
    #[serde(default, alias = "throttleValue")]
    throttle_percent: Option<f64>,
    #[serde(default, alias = "turnValue")]
    turn_percent: Option<f64>,
}

/// One axis of a direction pair: a word, or a bare percentage.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireAxis<D> {
    Word(D),
    Number(f64),
    Text(String),
}

/// An axis after its magnitude has been applied.
enum Axis<D> {
    FullScale(D),
    Scaled(f64),
}

impl<D: Into<i8> + Copy> Axis<D> {
    fn resolve(axis: WireAxis<D>, magnitude: Option<f64>) -> Result<Self> {
        match (axis, magnitude) {
            (WireAxis::Word(word), None) => Ok(Self::FullScale(word)),
            // Direction word gives the sign, the number only the size
            (WireAxis::Word(word), Some(magnitude)) => {
                let full_scale: i8 = word.into();
                Ok(Self::Scaled(f64::from(full_scale.signum()) * magnitude.abs()))
            },
            (WireAxis::Number(percent), _) => Ok(Self::Scaled(percent)),
            (WireAxis::Text(text), _) => {
                text.trim().parse().map(Self::Scaled).map_err(|_| ProtocolError::InvalidPayload {
                    event: events::CONTROL,
                    reason: format!("expected a direction or a percentage, got {text:?}"),
                })
            },
        }
    }

    fn percent(&self) -> f64 {
        match *self {
            Self::FullScale(word) => f64::from(Into::<i8>::into(word)),
            Self::Scaled(percent) => percent,
        }
    }
}

impl From<Throttle> for i8 {
    fn from(throttle: Throttle) -> Self {
        throttle.percent()
    }
}

impl From<Turn> for i8 {
    fn from(turn: Turn) -> Self {
        turn.percent()
    }
}

impl WireDirections {
    fn into_payload(self) -> Result<ControlPayload> {
        let throttle = Axis::resolve(self.throttle, self.throttle_percent)?;
        let turn = Axis::resolve(self.turn, self.turn_percent)?;

        match (throttle, turn) {
            (Axis::FullScale(throttle), Axis::FullScale(turn)) => {
                Ok(ControlPayload::Discrete { throttle, turn })
            },
            (throttle, turn) => {
                Ok(ControlPayload::Percent { throttle: throttle.percent(), steer: turn.percent() })
            },
        }
    }
}

impl ControlPayload {
    /// Decode the `data` of a `controlData` or `message` event.
    pub fn from_value(value: Value) -> Result<Self> {
        let wire: WireControl =
            serde_json::from_value(value).map_err(|_| ProtocolError::InvalidPayload {
                event: events::CONTROL,
                reason: "expected {t, s}, {throttle, turn} or a key command string".to_string(),
            })?;

        match wire {
            WireControl::Percent { t, s } => Ok(Self::Percent { throttle: t, steer: s }),
            WireControl::Directions(directions) => directions.into_payload(),
            WireControl::Legacy(text) => text.parse().map(Self::Key),
        }
    }

    /// Encode as the `data` of a `controlData` event.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Percent { throttle, steer } => json!({ "t": throttle, "s": steer }),
            Self::Discrete { throttle, turn } => json!({ "throttle": throttle, "turn": turn }),
            Self::Key(key) => Value::String(key.to_string()),
        }
    }
}

/// Canonical normalized command: both axes in `[-100, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DriveCommand {
    /// Throttle percentage, positive is forward
    pub throttle: i8,
    /// Steering percentage, positive is right
    pub steer: i8,
}

impl DriveCommand {
    /// Stationary, wheels straight.
    pub const NEUTRAL: Self = Self { throttle: 0, steer: 0 };

    /// Whether this command leaves the vehicle stationary.
    pub const fn is_neutral(&self) -> bool {
        self.throttle == 0 && self.steer == 0
    }
}

/// Command as delivered to the actuator (`pi_command`).
///
/// Carries both the direction words older firmware switches on and the
/// percentages newer firmware drives PWM from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorCommand {
    /// Longitudinal direction
    pub throttle: Throttle,
    /// Lateral direction
    pub turn: Turn,
    /// Signed throttle percentage
    pub throttle_percent: i8,
    /// Signed steering percentage
    pub turn_percent: i8,
    /// Set on emergency stops; firmware should latch the brake
    #[serde(default)]
    pub emergency: bool,
}

impl ActuatorCommand {
    /// Expand a normalized command for the actuator.
    pub const fn from_drive(cmd: DriveCommand, emergency: bool) -> Self {
        Self {
            throttle: Throttle::from_percent(cmd.throttle),
            turn: Turn::from_percent(cmd.steer),
            throttle_percent: cmd.throttle,
            turn_percent: cmd.steer,
            emergency,
        }
    }

    /// The normalized command this was built from.
    pub const fn drive(&self) -> DriveCommand {
        DriveCommand { throttle: self.throttle_percent, steer: self.turn_percent }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_percent_pair() {
        let payload = ControlPayload::from_value(json!({"t": 35, "s": -12.5})).unwrap();
        assert_eq!(payload, ControlPayload::Percent { throttle: 35.0, steer: -12.5 });
    }

    #[test]
    fn decodes_discrete_pair() {
        let payload =
            ControlPayload::from_value(json!({"throttle": "backward", "turn": "none"})).unwrap();
        assert_eq!(
            payload,
            ControlPayload::Discrete { throttle: Throttle::Backward, turn: Turn::Straight }
        );
    }

    #[test]
    fn signed_slider_values_size_the_directions() {
        let payload = ControlPayload::from_value(json!({
            "throttle": "forward",
            "turn": "left",
            "throttleValue": 20,
            "turnValue": -10
        }))
        .unwrap();
        assert_eq!(payload, ControlPayload::Percent { throttle: 20.0, steer: -10.0 });
    }

    #[test]
    fn unsigned_percentages_take_their_sign_from_the_words() {
        let payload = ControlPayload::from_value(json!({
            "throttle": "backward",
            "turn": "right",
            "throttle_percent": 15,
            "turn_percent": 30
        }))
        .unwrap();
        assert_eq!(payload, ControlPayload::Percent { throttle: -15.0, steer: 30.0 });

        let stopped = ControlPayload::from_value(json!({
            "throttle": "stop",
            "turn": "none",
            "throttle_percent": 80,
            "turn_percent": 0
        }))
        .unwrap();
        assert_eq!(stopped, ControlPayload::Percent { throttle: 0.0, steer: 0.0 });
    }

    #[test]
    fn numeric_axis_is_a_percentage() {
        let payload = ControlPayload::from_value(json!({"throttle": "50", "turn": "none"})).unwrap();
        assert_eq!(payload, ControlPayload::Percent { throttle: 50.0, steer: 0.0 });

        let payload = ControlPayload::from_value(json!({"throttle": -35, "turn": "right"})).unwrap();
        assert_eq!(payload, ControlPayload::Percent { throttle: -35.0, steer: 100.0 });
    }

    #[test]
    fn one_sized_axis_keeps_the_other_at_full_scale() {
        let payload = ControlPayload::from_value(json!({
            "throttle": "forward",
            "turn": "left",
            "throttle_percent": 40
        }))
        .unwrap();
        assert_eq!(payload, ControlPayload::Percent { throttle: 40.0, steer: -100.0 });
    }

    #[test]
    fn decodes_legacy_key_strings() {
        let payload = ControlPayload::from_value(json!("LEFT released")).unwrap();
        assert_eq!(payload, ControlPayload::Key(KeyEvent { key: ArrowKey::Left, pressed: false }));

        let payload = ControlPayload::from_value(json!("up Pressed")).unwrap();
        assert_eq!(payload, ControlPayload::Key(KeyEvent { key: ArrowKey::Up, pressed: true }));
    }

    #[test]
    fn rejects_unknown_key_strings() {
        assert!(matches!(
            ControlPayload::from_value(json!("JUMP pressed")),
            Err(ProtocolError::UnknownKeyCommand(_))
        ));
        assert!(matches!(
            ControlPayload::from_value(json!("UP pressed twice")),
            Err(ProtocolError::UnknownKeyCommand(_))
        ));
    }

    #[test]
    fn rejects_partial_objects() {
        assert!(matches!(
            ControlPayload::from_value(json!({"t": 10})),
            Err(ProtocolError::InvalidPayload { .. })
        ));
        assert!(matches!(
            ControlPayload::from_value(json!({"throttle": "sideways", "turn": "left"})),
            Err(ProtocolError::InvalidPayload { .. })
        ));
        assert!(matches!(
            ControlPayload::from_value(json!({"throttle": "fast", "turn": "none"})),
            Err(ProtocolError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn actuator_command_carries_directions_and_percentages() {
        let cmd = ActuatorCommand::from_drive(DriveCommand { throttle: -40, steer: 15 }, false);
        assert_eq!(cmd.throttle, Throttle::Backward);
        assert_eq!(cmd.turn, Turn::Right);
        assert_eq!(cmd.drive(), DriveCommand { throttle: -40, steer: 15 });

        let stop = ActuatorCommand::from_drive(DriveCommand::NEUTRAL, true);
        assert_eq!(
            serde_json::to_value(stop).unwrap(),
            json!({
                "throttle": "stop",
                "turn": "none",
                "throttle_percent": 0,
                "turn_percent": 0,
                "emergency": true
            })
        );
    }
}
