//! API route definitions

use axum::routing::get;
use axum::routing::post;
use axum::Router;

use super::handlers;
use super::handlers::AppState;

/// Create RESTful API router
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Chat endpoints
        .route("/chat", post(handlers::chat))
        .route("/chat/history/:user_id", get(handlers::history))
        // Knowledge base
        .route("/knowledge/ingest", post(handlers::ingest))
        // Statistics
        .route("/stats", get(handlers::stats))
        .with_state(state)
}
