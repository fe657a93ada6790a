//! Event validation -- raw inbound payload to typed [`Event`], or the full
//! list of violated constraints.
//!
//! Validation is a pure function of the raw payload and static limits. It
//! never stops at the first problem: a request missing `user_id` with an
//! unknown `signal_type` gets both violations back in one response.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::event::{Event, RawEvent, SignalType};

/// One violated field constraint.
#[derive(Debug, Clone, Serialize)]
pub struct FieldViolation {
    pub field: &'static str,
    pub message: String,
}

impl FieldViolation {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Rejected input, one entry per broken constraint.
#[derive(Debug, Error)]
#[error("event validation failed: {} violation(s)", .violations.len())]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

fn known_signal_types() -> String {
    SignalType::ALL
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Check a raw payload against the event schema.
///
/// `received_at` is stamped by the caller once per ingestion flow and
/// becomes the clock detection counts against; the client-supplied
/// `timestamp` is only stored. Oversized payloads are rejected outright,
/// never truncated.
pub fn validate(
    raw: &RawEvent,
    max_payload_bytes: usize,
    received_at: DateTime<Utc>,
) -> Result<Event, ValidationError> {
    let mut violations = Vec::new();

    let user_id = require_id("user_id", raw.user_id.as_deref(), &mut violations);
    let agent_id = require_id("agent_id", raw.agent_id.as_deref(), &mut violations);

    let signal_type = match raw.signal_type.as_deref() {
        None => {
            violations.push(FieldViolation::new("signal_type", "is required"));
            None
        }
        Some(name) => match SignalType::parse(name) {
            Some(signal) => Some(signal),
            None => {
                violations.push(FieldViolation::new(
                    "signal_type",
                    format!("unknown value '{name}'; known signal types: {}", known_signal_types()),
                ));
                None
            }
        },
    };

    let timestamp = match raw.timestamp.as_deref() {
        None => {
            violations.push(FieldViolation::new("timestamp", "is required"));
            None
        }
        Some(text) => match DateTime::parse_from_rfc3339(text) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(e) => {
                violations.push(FieldViolation::new(
                    "timestamp",
                    format!("'{text}' is not an RFC 3339 timestamp: {e}"),
                ));
                None
            }
        },
    };

    let event_id = match raw.event_id.as_deref() {
        None => Some(Uuid::new_v4()),
        Some(text) => match Uuid::parse_str(text) {
            Ok(id) => Some(id),
            Err(_) => {
                violations.push(FieldViolation::new(
                    "event_id",
                    format!("'{text}' is not a well-formed UUID"),
                ));
                None
            }
        },
    };

    let payload = raw
        .payload
        .clone()
        .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
    match serde_json::to_vec(&payload) {
        Ok(bytes) if bytes.len() > max_payload_bytes => {
            violations.push(FieldViolation::new(
                "payload",
                format!(
                    "payload is {} bytes, over the {} byte limit",
                    bytes.len(),
                    max_payload_bytes
                ),
            ));
        }
        Ok(_) => {}
        Err(e) => {
            violations.push(FieldViolation::new(
                "payload",
                format!("payload is not serializable: {e}"),
            ));
        }
    }

    match (user_id, agent_id, signal_type, timestamp, event_id) {
        (Some(user_id), Some(agent_id), Some(signal_type), Some(timestamp), Some(event_id))
            if violations.is_empty() =>
        {
            Ok(Event {
                event_id,
                user_id,
                agent_id,
                signal_type,
                timestamp,
                received_at,
                payload,
            })
        }
        _ => Err(ValidationError { violations }),
    }
}

fn require_id(
    field: &'static str,
    value: Option<&str>,
    violations: &mut Vec<FieldViolation>,
) -> Option<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Some(v.to_string()),
        Some(_) => {
            violations.push(FieldViolation::new(field, "must be non-empty"));
            None
        }
        None => {
            violations.push(FieldViolation::new(field, "is required"));
            None
        }
    }
}
