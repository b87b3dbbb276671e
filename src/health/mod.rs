//! Health check endpoints
//!
//! `/health` for liveness, `/ready` once the control listener accepts
//! connections, `/metrics` in Prometheus text format.

use crate::controller::{AdmissionController, StateSnapshot};
use crate::metrics::ManagerMetrics;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    #[serde(flatten)]
    pub state: StateSnapshot,
}

/// Application state for health endpoints
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<AdmissionController>,
    pub metrics: ManagerMetrics,
}

/// Create the health check router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Health endpoint - always returns 200 if process is running
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness endpoint - returns 200 once shards can connect
async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let response = ReadyResponse {
        ready: state.controller.is_listening(),
        state: state.controller.snapshot(),
    };

    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Metrics endpoint - returns Prometheus format metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.set_state(&state.controller.snapshot());

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy",
            version: "0.2.0",
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("healthy"));
    }

    #[test]
    fn test_ready_response_flattens_state() {
        let response = ReadyResponse {
            ready: true,
            state: StateSnapshot {
                max_concurrency: 16,
                queued: 3,
                connecting: 16,
                identify_window_in_use: 16,
                tracked_sockets: 19,
                rate_limited: true,
            },
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["ready"], true);
        assert_eq!(json["queued"], 3);
        assert_eq!(json["max_concurrency"], 16);
    }
}
