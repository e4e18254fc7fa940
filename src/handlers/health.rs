use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use crate::models::{ErrorResponse, HealthResponse};
use crate::AppState;
use tracing::debug;

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse::ok("Relay is running"))
}

/// Readiness check endpoint, fails once shutdown started
pub async fn ready_check(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, ErrorResponse> {
    debug!("Readiness check requested");
    if app_state.is_shutting_down() {
        return Err(ErrorResponse::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Relay is shutting down",
        ));
    }
    Ok(Json(HealthResponse {
        rooms: Some(app_state.registry.room_count()),
        ..HealthResponse::ok("Relay is ready")
    }))
}
