//! sigwarden -- event integrity and rate-anomaly engine for AI-agent
//! telemetry.
//!
//! Inbound events are validated against a closed schema, appended durably
//! to SQLite, and counted against per-(user, signal) sliding windows; a
//! window that overruns its threshold persists an anomaly record and, at
//! critical severity, fires a webhook alert.

pub mod api;
pub mod config;
pub mod detect;
pub mod event;
pub mod ingest;
pub mod notify;
pub mod storage;

use std::sync::Arc;

use anyhow::Result;

use crate::config::AppConfig;

/// Start the sigwarden service: storage, detector, eviction sweep, and the
/// HTTP listener. Runs until the process exits.
pub async fn serve(config: AppConfig) -> Result<()> {
    tracing::info!(db_path = %config.db_path, "initializing database");
    let pool = storage::open_pool(&config.db_path)?;
    let store = storage::EventStore::new(pool);

    let detector = detect::tracker::Detector::new(config.policies.clone());
    let sink: Arc<dyn notify::AlertSink> = Arc::new(notify::WebhookSink::new(&config.alerts)?);
    let coordinator =
        ingest::Coordinator::new(store.clone(), detector.clone(), sink, config.max_payload_bytes);

    tokio::spawn(detect::tracker::run_eviction_loop(
        detector,
        config.eviction_sweep,
    ));

    let app = api::router(api::state::AppState { coordinator, store });

    tracing::info!(addr = %config.bind, "sigwarden listening");
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
