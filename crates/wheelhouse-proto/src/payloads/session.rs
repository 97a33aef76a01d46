//! Participant session payloads.

use serde::{Deserialize, Serialize};

use crate::{ids::SessionId, payloads::admin::lenient_i64};

/// `session`: the id assigned to this connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAssigned {
    /// Assigned session id
    pub sid: SessionId,
}

/// `timeleft`: holder heartbeat.
///
/// The value is what the client's own timer shows. The server treats it as a
/// liveness signal only; it never changes the authoritative countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Client-observed seconds remaining
    #[serde(rename = "message", default, deserialize_with = "lenient_i64")]
    pub seconds_remaining: i64,
}

/// `identify`: client self-description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identify {
    /// Free-form agent string; the vehicle sends `"Pi"`
    pub user_agent: String,
}

impl Identify {
    /// Whether this client is the vehicle rather than a participant.
    pub fn is_actuator(&self) -> bool {
        let agent = self.user_agent.trim();
        agent.eq_ignore_ascii_case("pi") || agent.eq_ignore_ascii_case("actuator")
    }
}

/// `countdown`: authoritative remaining seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Countdown {
    /// Seconds left in the current turn
    pub time_remaining: u32,
}

/// `queuePosition`: where a waiting session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePosition {
    /// 0-based rank; 0 means next in line (or holding)
    pub position: usize,
    /// Total sessions in the queue
    pub queue_length: usize,
}

/// `removed`: an admin took this session out of the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Removed {
    /// Human readable reason
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn heartbeat_defaults_missing_value() {
        let hb: Heartbeat = serde_json::from_value(json!({})).unwrap();
        assert_eq!(hb.seconds_remaining, 0);

        let hb: Heartbeat = serde_json::from_value(json!({"message": "42"})).unwrap();
        assert_eq!(hb.seconds_remaining, 42);
    }

    #[test]
    fn actuator_identification_is_case_insensitive() {
        assert!(Identify { user_agent: "Pi".into() }.is_actuator());
        assert!(Identify { user_agent: " ACTUATOR ".into() }.is_actuator());
        assert!(!Identify { user_agent: "Mozilla/5.0".into() }.is_actuator());
    }
}
