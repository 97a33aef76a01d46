//! Admin plane payloads.

use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;

use crate::ids::SessionId;

/// One queue row as shown to admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRow {
    /// Session id
    pub sid: SessionId,
    /// Turn allowance in seconds
    pub time_allowed: u32,
    /// Seconds left; only meaningful for the holder
    pub time_remaining: u32,
    /// Whether the connection is still open
    pub connected: bool,
}

/// Global timing bounds, echoed in every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingConfig {
    /// Allowance given to newly admitted sessions
    pub default_time_allowed: u32,
    /// Lower bound for any allowance
    pub min_time_allowed: u32,
    /// Upper bound for any allowance
    pub max_time_allowed: u32,
}

/// Full queue state (`adminResponseQueue`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Rows in queue order
    pub queue: Vec<SessionRow>,
    /// Holder position, `null` when nobody holds control
    pub current_index: Option<usize>,
    /// Timing bounds
    pub config: TimingConfig,
    /// Whether promotion is suspended after an emergency stop
    pub frozen: bool,
}

/// Human readable admin log line (`adminNotification`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminNotification {
    /// What happened
    pub message: String,
    /// Unix seconds
    pub timestamp: u64,
}

/// Actuator presence (`piStatus`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorStatus {
    /// Whether an actuator is attached
    pub connected: bool,
}

/// `adminUpdateUser` request.
///
/// The admin table posts back whole rows; only `sid` and `timeAllowed` are
/// read, everything else is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    /// Target session
    pub sid: SessionId,
    /// New allowance in seconds, range-checked by the arbiter
    #[serde(deserialize_with = "lenient_i64")]
    pub time_allowed: i64,
}

/// `adminRemoveUser` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveUser {
    /// Target session
    pub sid: SessionId,
}

/// `adminSetDefaultTime` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDefaultTime {
    /// New default allowance in seconds, range-checked by the arbiter
    #[serde(deserialize_with = "lenient_i64")]
    pub time: i64,
}

/// `adminMoveUser` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveUser {
    /// Target session
    pub sid: SessionId,
    /// Destination index (0 is the head)
    pub position: usize,
}

/// Accept an integer, a finite float (rounded) or a numeric string.
///
/// Admin forms post whatever the input element holds, so `"45"` and `45.0`
/// both show up for the same field.
pub(crate) fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let parsed = match &value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(round_f64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| s.parse::<f64>().ok().and_then(round_f64))
        },
        _ => None,
    };

    parsed.ok_or_else(|| de::Error::custom(format!("expected a number, got {value}")))
}

fn round_f64(v: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive
    if v.is_finite() && v >= i64::MIN as f64 && v < i64::MAX as f64 {
        Some(v.round() as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn update_user_ignores_extra_row_fields() {
        let req: UpdateUser = serde_json::from_value(json!({
            "sid": "000000000000000a",
            "timeAllowed": "45",
            "timeRemaining": 12,
            "connected": true
        }))
        .unwrap();
        assert_eq!(req, UpdateUser { sid: SessionId::new(10), time_allowed: 45 });
    }

    #[test]
    fn lenient_numbers() {
        let req: SetDefaultTime = serde_json::from_value(json!({"time": 59.6})).unwrap();
        assert_eq!(req.time, 60);

        let req: SetDefaultTime = serde_json::from_value(json!({"time": " 120 "})).unwrap();
        assert_eq!(req.time, 120);

        let req: SetDefaultTime = serde_json::from_value(json!({"time": -5})).unwrap();
        assert_eq!(req.time, -5);

        assert!(serde_json::from_value::<SetDefaultTime>(json!({"time": "soon"})).is_err());
        assert!(serde_json::from_value::<SetDefaultTime>(json!({"time": null})).is_err());
        assert!(serde_json::from_value::<SetDefaultTime>(json!({"time": 1e300})).is_err());
    }

    #[test]
    fn snapshot_uses_snake_case_index() {
        let snapshot = QueueSnapshot {
            queue: vec![SessionRow {
                sid: SessionId::new(1),
                time_allowed: 90,
                time_remaining: 80,
                connected: true,
            }],
            current_index: Some(0),
            config: TimingConfig {
                default_time_allowed: 90,
                min_time_allowed: 10,
                max_time_allowed: 3000,
            },
            frozen: false,
        };

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["current_index"], json!(0));
        assert_eq!(value["queue"][0]["timeAllowed"], json!(90));
        assert_eq!(value["config"]["defaultTimeAllowed"], json!(90));
    }
}
