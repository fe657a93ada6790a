//! Ingestion pipeline -- validate, store, detect, notify, respond.
//!
//! The order is fixed. Validation succeeds before anything touches disk or
//! detector state; the event write is confirmed before the window counts
//! it, so a storage failure leaves no phantom observation; the anomaly row
//! is durable before any alert goes out. Alert dispatch runs detached and
//! can never fail or delay the caller.

pub mod validate;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::detect::tracker::Detector;
use crate::detect::{Anomaly, DetectionResult, Severity};
use crate::event::RawEvent;
use crate::notify::{AlertPayload, AlertSink};
use crate::storage::{EventStore, StorageError};

pub use self::validate::{validate, FieldViolation, ValidationError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// What the caller gets back for one accepted event.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub event_id: Uuid,
    pub stored: bool,
    /// Present only when the observation crossed the signal's threshold.
    pub anomaly: Option<DetectionResult>,
}

/// Runs the pipeline for one inbound event. Cheap to clone; every request
/// flow gets its own handle over the shared store, detector, and sink.
#[derive(Clone)]
pub struct Coordinator {
    store: EventStore,
    detector: Detector,
    sink: Arc<dyn AlertSink>,
    max_payload_bytes: usize,
}

impl Coordinator {
    pub fn new(
        store: EventStore,
        detector: Detector,
        sink: Arc<dyn AlertSink>,
        max_payload_bytes: usize,
    ) -> Self {
        Self {
            store,
            detector,
            sink,
            max_payload_bytes,
        }
    }

    /// Take one raw event through validate -> append -> observe -> record ->
    /// dispatch. A disconnecting caller does not interrupt the flow; it runs
    /// to completion or to a genuine storage failure.
    pub async fn ingest(&self, raw: RawEvent) -> Result<IngestOutcome, IngestError> {
        let received_at = Utc::now();
        let event = validate(&raw, self.max_payload_bytes, received_at)?;

        self.store.append_event(&event).await?;

        let result = self
            .detector
            .observe(&event.user_id, event.signal_type, event.received_at);

        let anomaly = match result.severity {
            None => None,
            Some(severity) => {
                let anomaly = Anomaly {
                    user_id: event.user_id.clone(),
                    signal_type: event.signal_type,
                    severity,
                    window_count: result.count,
                    threshold: result.threshold,
                    window_start: result.window_start,
                    detected_at: event.received_at,
                    event_id: event.event_id,
                };
                self.store.append_anomaly(&anomaly).await?;
                warn!(
                    user_id = %anomaly.user_id,
                    signal_type = %anomaly.signal_type,
                    count = anomaly.window_count,
                    threshold = anomaly.threshold,
                    severity = %severity,
                    "rate anomaly detected"
                );

                if severity == Severity::Critical {
                    self.dispatch_alert(AlertPayload::from(&anomaly));
                }
                Some(result)
            }
        };

        Ok(IngestOutcome {
            event_id: event.event_id,
            stored: true,
            anomaly,
        })
    }

    /// Fire-once alert delivery on a detached task. Failures are logged and
    /// dropped; the anomaly is already durable by the time this runs.
    fn dispatch_alert(&self, alert: AlertPayload) {
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            if let Err(e) = sink.send(&alert).await {
                warn!(
                    user_id = %alert.user_id,
                    signal_type = %alert.signal_type,
                    error = %e,
                    "alert dispatch failed"
                );
            }
        });
    }
}
