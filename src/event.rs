//! Telemetry event model -- signal types and the raw/typed event pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed set of telemetry signal categories.
///
/// `signal_type` partitions detector state together with `user_id`; values
/// outside this set are a validation failure, never silently accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Hrv,
    Eda,
    SkinTemp,
    RespRate,
    Sentiment,
    Engagement,
}

impl SignalType {
    pub const ALL: [SignalType; 6] = [
        SignalType::Hrv,
        SignalType::Eda,
        SignalType::SkinTemp,
        SignalType::RespRate,
        SignalType::Sentiment,
        SignalType::Engagement,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Wire name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Hrv => "hrv",
            SignalType::Eda => "eda",
            SignalType::SkinTemp => "skin_temp",
            SignalType::RespRate => "resp_rate",
            SignalType::Sentiment => "sentiment",
            SignalType::Engagement => "engagement",
        }
    }

    pub fn parse(s: &str) -> Option<SignalType> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    /// Table index; `ALL` and the policy table share this ordering.
    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound event as parsed from the request body, before validation.
///
/// Every field is optional at the serde level so the validator can report
/// all violated constraints in one pass instead of failing on the first
/// missing field during deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEvent {
    /// Client-assigned idempotency id. Assigned server-side when absent.
    pub event_id: Option<String>,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub signal_type: Option<String>,
    /// RFC 3339 timestamp string.
    pub timestamp: Option<String>,
    /// Opaque value bag; defaults to `{}` when omitted.
    pub payload: Option<serde_json::Value>,
}

/// A validated, immutable telemetry event.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event_id: Uuid,
    pub user_id: String,
    pub agent_id: String,
    pub signal_type: SignalType,
    /// Nominal client time. Stored, but never drives detection windows.
    pub timestamp: DateTime<Utc>,
    /// Server receipt time; the clock that detection counts against.
    pub received_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_type_wire_names_round_trip() {
        for signal in SignalType::ALL {
            assert_eq!(SignalType::parse(signal.as_str()), Some(signal));
            let json = serde_json::to_string(&signal).unwrap();
            assert_eq!(json, format!("\"{}\"", signal.as_str()));
        }
    }

    #[test]
    fn signal_type_rejects_unknown() {
        assert_eq!(SignalType::parse("heartbeat"), None);
        assert_eq!(SignalType::parse(""), None);
        assert_eq!(SignalType::parse("HRV"), None);
    }

    #[test]
    fn indexes_match_all_ordering() {
        for (i, signal) in SignalType::ALL.iter().enumerate() {
            assert_eq!(signal.index(), i);
        }
    }

    #[test]
    fn raw_event_tolerates_missing_fields() {
        let raw: RawEvent = serde_json::from_str("{}").unwrap();
        assert!(raw.user_id.is_none());
        assert!(raw.signal_type.is_none());
        assert!(raw.payload.is_none());

        let raw: RawEvent =
            serde_json::from_str(r#"{"user_id":"u1","signal_type":"hrv"}"#).unwrap();
        assert_eq!(raw.user_id.as_deref(), Some("u1"));
        assert_eq!(raw.signal_type.as_deref(), Some("hrv"));
    }
}
