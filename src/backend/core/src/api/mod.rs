//! HTTP surface of the recovery orchestrator.
//!
//! | Method | Path                   | Purpose                                  |
//! |--------|------------------------|------------------------------------------|
//! | GET    | `/`                    | Dashboard summary                        |
//! | GET    | `/events`              | Server-sent event stream                 |
//! | GET    | `/health`              | Liveness                                 |
//! | GET    | `/metrics`             | Prometheus exposition                    |
//! | GET    | `/api/status`          | Current session snapshot                 |
//! | GET    | `/api/backups`         | Backup manifests, newest first           |
//! | POST   | `/api/start-recovery`  | Start a session (202, or 409 if active)  |
//! | POST   | `/api/toggle-test-mode`| Enable or disable fault injection        |
//! | POST   | `/api/fix-error`       | Remediate one diagnostic error           |

mod handlers;
mod sse;

use axum::{
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::recovery::RecoveryOrchestrator;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: RecoveryOrchestrator,
}

impl AppState {
    pub fn new(orchestrator: RecoveryOrchestrator) -> Self {
        Self { orchestrator }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::dashboard))
        .route("/events", get(sse::events))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/api/status", get(handlers::status))
        .route("/api/backups", get(handlers::list_backups))
        .route("/api/start-recovery", post(handlers::start_recovery))
        .route("/api/toggle-test-mode", post(handlers::toggle_test_mode))
        .route("/api/fix-error", post(handlers::fix_error))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Envelope for successful POST responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success("started").with_message("ok");
        assert!(response.success);
        assert_eq!(response.data, Some("started"));
        assert_eq!(response.message.as_deref(), Some("ok"));
    }

    #[test]
    fn test_api_response_omits_empty_fields() {
        let json = serde_json::to_value(ApiResponse::success(1)).unwrap();
        assert!(json.get("message").is_none());
        assert_eq!(json["data"], 1);
    }
}
