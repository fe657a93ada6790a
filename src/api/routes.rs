//! HTTP handlers for event ingestion and anomaly queries.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use crate::api::state::AppState;
use crate::event::RawEvent;
use crate::ingest::IngestError;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/events", post(ingest_event))
        .route("/anomalies/{user_id}", get(anomalies_for_user))
        .route("/health", get(health))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn ingest_event(State(state): State<AppState>, Json(raw): Json<RawEvent>) -> Response {
    match state.coordinator.ingest(raw).await {
        Ok(outcome) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "data": outcome,
                "meta": {
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                    "version": env!("CARGO_PKG_VERSION")
                }
            })),
        )
            .into_response(),
        Err(IngestError::Validation(e)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "error": "event validation failed",
                "violations": e.violations
            })),
        )
            .into_response(),
        Err(IngestError::Storage(e)) => {
            error!(error = %e, "event ingestion failed at storage");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "storage failure" })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnomalyQuery {
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    100
}

async fn anomalies_for_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<AnomalyQuery>,
) -> Response {
    match state.store.anomalies_for_user(&user_id, query.limit).await {
        Ok(records) => {
            let total = records.len();
            (
                StatusCode::OK,
                Json(json!({ "data": records, "meta": { "total": total } })),
            )
                .into_response()
        }
        Err(e) => {
            error!(%user_id, error = %e, "anomaly query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "storage failure" })),
            )
                .into_response()
        }
    }
}
