//! # Gateway API
//!
//! The HTTP boundary: translates external requests into scheduler jobs and
//! scheduler results into responses. Route surface:
//!
//! | Route          | Method | Purpose                                |
//! |----------------|--------|----------------------------------------|
//! | `/chat`        | POST   | buffered chat completion               |
//! | `/chat/stream` | POST   | incremental completion over SSE        |
//! | `/health`      | GET    | readiness/liveness snapshot            |
//! | `/models`      | GET    | available model listing                |
//! | `/`            | GET    | service banner                         |
//!
//! Each error-taxonomy entry maps to a distinct status code and a
//! machine-readable `type` field, so automated clients branch on failure
//! kind rather than parsing text.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::health::HealthMonitor;
use crate::scheduler::Scheduler;

mod handlers;
mod sse;

/// Shared application state.
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub health: Arc<HealthMonitor>,
    pub model_id: String,
}

/// Builds the gateway router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/chat", post(handlers::chat))
        .route("/chat/stream", post(handlers::chat_stream))
        .route("/health", get(handlers::health))
        .route("/models", get(handlers::models))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
