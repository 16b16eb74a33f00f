//! API request handlers.
//!
//! Handlers return `Result<impl IntoResponse, GuardError>`; errors become
//! status codes through the `IntoResponse` impl on `GuardError`.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ApiResponse, AppState};
use crate::error::GuardError;
use crate::recovery::StatusSnapshot;

// ═══════════════════════════════════════════════════════════════════════════════
// Dashboard & Health
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn dashboard(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = &state.orchestrator;
    let services: Vec<_> = orchestrator
        .registry()
        .list()
        .iter()
        .map(|s| serde_json::json!({ "name": s.name, "port": s.port, "role": s.role }))
        .collect();

    Json(serde_json::json!({
        "service": "portguard",
        "version": env!("CARGO_PKG_VERSION"),
        "state": orchestrator.state(),
        "testMode": orchestrator.test_mode(),
        "services": services,
        "routes": [
            "GET /events",
            "GET /health",
            "GET /metrics",
            "GET /api/status",
            "GET /api/backups",
            "POST /api/start-recovery",
            "POST /api/toggle-test-mode",
            "POST /api/fix-error",
        ],
    }))
}

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn prometheus_metrics() -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        crate::telemetry::metrics::render(),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Recovery
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.orchestrator.status().await)
}

pub async fn list_backups(State(state): State<AppState>) -> Result<impl IntoResponse, GuardError> {
    let backups = state.orchestrator.backups().await?;
    Ok(Json(ApiResponse::success(backups)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecoveryRequest {
    pub test_mode: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecoveryResponse {
    pub session_id: Uuid,
}

/// The body is optional; without one the current test mode is kept.
pub async fn start_recovery(
    State(state): State<AppState>,
    body: Option<Json<StartRecoveryRequest>>,
) -> Result<impl IntoResponse, GuardError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let session_id = state.orchestrator.start(req.test_mode)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(StartRecoveryResponse { session_id }).with_message("Recovery started")),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleTestModeRequest {
    pub test_mode: bool,
}

pub async fn toggle_test_mode(
    State(state): State<AppState>,
    Json(req): Json<ToggleTestModeRequest>,
) -> impl IntoResponse {
    let enabled = state.orchestrator.set_test_mode(req.test_mode);
    Json(ApiResponse::success(serde_json::json!({ "testMode": enabled })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixErrorRequest {
    pub error_id: String,
}

pub async fn fix_error(
    State(state): State<AppState>,
    Json(req): Json<FixErrorRequest>,
) -> Result<impl IntoResponse, GuardError> {
    if req.error_id.trim().is_empty() {
        return Err(GuardError::validation("errorId cannot be empty"));
    }

    let step = state.orchestrator.fix_error(req.error_id.trim()).await?;
    let message = match &step.failure_reason {
        Some(reason) => format!("Fix failed: {}", reason),
        None => format!("{} completed", step.title),
    };
    Ok(Json(ApiResponse::success(step).with_message(message)))
}
