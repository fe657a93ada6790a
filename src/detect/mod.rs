//! Rate-anomaly detection over per-user, per-signal sliding windows.
//!
//! Each `(user_id, signal_type)` pair moves through a small lifecycle:
//! absent until its first event, active while the window holds at least one
//! instant, and reclaimed again once the key has sat idle past its expiry.
//! No event is required for a window to empty out; time alone does that.

pub mod tracker;
pub mod window;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SignalPolicy;
use crate::event::SignalType;

/// Severity of a rate anomaly. There is no "none" variant: an observation
/// that stays at or under threshold produces no anomaly at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Severity> {
        match s {
            "warning" => Some(Severity::Warning),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map an in-window count onto a severity band.
///
/// At or under threshold is quiet. Above threshold but within
/// `severity_multiplier * threshold` is a warning; past that, critical.
pub fn classify(count: u32, policy: &SignalPolicy) -> Option<Severity> {
    if count <= policy.threshold {
        return None;
    }
    let critical_above = policy.threshold as f64 * policy.severity_multiplier;
    if count as f64 > critical_above {
        Some(Severity::Critical)
    } else {
        Some(Severity::Warning)
    }
}

/// What one observation saw: the post-insert window count, the policy it was
/// judged against, and the verdict.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DetectionResult {
    pub count: u32,
    pub threshold: u32,
    pub severity: Option<Severity>,
    pub window_start: DateTime<Utc>,
}

/// A detected rate anomaly, ready to persist and alert on.
#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    pub user_id: String,
    pub signal_type: SignalType,
    pub severity: Severity,
    pub window_count: u32,
    pub threshold: u32,
    pub window_start: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
    /// Event whose observation crossed the threshold.
    pub event_id: Uuid,
}

/// A persisted anomaly row. The id is assigned by storage on insert.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyRecord {
    pub id: i64,
    #[serde(flatten)]
    pub anomaly: Anomaly,
}
