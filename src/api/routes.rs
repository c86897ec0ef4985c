//! Route definitions.

use super::handlers::*;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Session lifecycle
        .route("/sessions", post(create_session_handler))
        .route("/sessions", get(list_sessions_handler))
        .route("/sessions/join", post(join_session_handler))
        .route("/sessions/:id/pick", post(submit_pick_handler))
        .route("/sessions/:id", get(session_status_handler))
        // Settlement history for dispute resolution
        .route("/settlements", get(recent_settlements_handler))
        // Prometheus metrics
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
