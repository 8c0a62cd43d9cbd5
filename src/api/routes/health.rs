//! Health Routes
//!
//! Health check endpoints for monitoring and Kubernetes probes.
//!
//! - GET /health/live - Liveness probe (process is alive)
//! - GET /health/ready - Readiness probe (hub is delivering)
//! - GET /health - Full health status

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

/// GET /health/live
///
/// Returns 200 if the process is alive, no dependency checks.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready
///
/// Returns 200 while the delivery loop is running.
pub async fn readiness(State(state): State<Arc<AppState>>) -> ApiResult<StatusCode> {
    if state.hub.is_running() {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError::ServiceUnavailable(
            "realtime hub is not running".to_string(),
        ))
    }
}

/// GET /health
pub async fn full_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let running = state.hub.is_running();

    Json(HealthResponse {
        status: if running { "healthy" } else { "degraded" }.to_string(),
        hub: if running { "running" } else { "stopped" }.to_string(),
        stats: state.hub.stats().await,
        limits: state.hub.config().clone(),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
