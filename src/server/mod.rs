//! Streaming Gateway: the axum HTTP surface over the Coordinator.

pub mod handlers;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::coordinator::Coordinator;
use state::AppState;

/// Build the router. The binary owns the listener; this only wires routes
/// and the two cross-cutting layers the teacher's own HTTP surfaces use
/// (request tracing, permissive CORS for the study-platform front end).
#[must_use]
pub fn build_router(coordinator: Arc<Coordinator>) -> Router {
    let state = AppState::new(coordinator);

    Router::new()
        .route("/healthz", get(handlers::healthz_handler))
        .route("/documents/:document_id/extract-syllabus", post(handlers::start_extraction_handler))
        .route("/extraction-jobs/:job_id", get(handlers::job_snapshot_handler))
        .route("/extraction-jobs/:job_id/stream", get(handlers::job_stream_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
