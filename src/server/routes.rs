//! Router configuration for the API server.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/watches", get(handlers::list_watches))
        .route("/api/watches/:watch_id/runs", get(handlers::list_runs))
        .route(
            "/api/watches/:watch_id/trigger",
            post(handlers::trigger_watch),
        )
        .route("/api/events", get(handlers::list_events))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
