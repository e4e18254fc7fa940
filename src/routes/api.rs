use crate::{docs::ApiDoc, handlers::{diagnostics, health_check, ready_check}, websocket::websocket_handler, AppState};
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Create API routes
pub fn create_api_routes(app_state: Arc<AppState>) -> Router {
    Router::<Arc<AppState>>::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/v1/diagnostics", get(diagnostics))
        .with_state(app_state)
}

/// Router of the admin listener: API, Swagger UI and request tracing
pub fn create_admin_routes(app_state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", create_api_routes(app_state))
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
}

/// Router of the relay listener: every path is a document
pub fn create_relay_routes(app_state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(websocket_handler)
        .with_state(app_state)
}
