//! Status and health check endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use pushmirror_core::sync_engine::{DeliveryReport, EngineStats};

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: String,
}

#[derive(Serialize)]
struct StatusResponse {
    started_at: String,
    uptime_secs: i64,
    rules: usize,
    deliveries: EngineStats,
    last_delivery: Option<DeliveryReport>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/status/health", get(health_check))
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let engine = &state.engine;
    let started_at = engine.started_at();
    Json(StatusResponse {
        started_at: started_at.to_rfc3339(),
        uptime_secs: (Utc::now() - started_at).num_seconds().max(0),
        rules: engine.rule_count(),
        deliveries: engine.stats(),
        last_delivery: engine.last_report(),
    })
}

// ---------------------------------------------------------------------------
// Shared error type for API handlers
// ---------------------------------------------------------------------------

/// Simple API error type that converts to an Axum response.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (axum::http::StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (axum::http::StatusCode::UNAUTHORIZED, msg),
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
