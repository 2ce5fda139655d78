//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;

use super::AppState;
use super::sse::chat_stream_sse;
use crate::error::{AdmissionError, EngineError, JobError};
use crate::request::{ChatRequest, UsageSummary};

/// Non-standard nginx convention for "client closed the request".
const CLIENT_CLOSED_REQUEST: u16 = 499;

#[derive(Serialize)]
struct ChatResponse {
    response: String,
    usage: UsageSummary,
    model: String,
    processing_time: f64,
}

#[derive(Serialize)]
struct ErrorDetail {
    message: String,
    r#type: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ModelInfo {
    id: String,
    object: &'static str,
    created: i64,
    owned_by: &'static str,
}

#[derive(Serialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

fn admission_status(err: &AdmissionError) -> (StatusCode, &'static str) {
    match err {
        AdmissionError::QueueFull => (StatusCode::TOO_MANY_REQUESTS, "overloaded"),
        AdmissionError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
    }
}

fn job_status(err: &JobError) -> (StatusCode, &'static str) {
    match err {
        JobError::TimedOut => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
        JobError::Cancelled => (
            StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            "cancelled",
        ),
        JobError::Engine(EngineError::Unavailable(_)) => {
            (StatusCode::SERVICE_UNAVAILABLE, "engine_unavailable")
        }
        JobError::Engine(EngineError::Generation(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "engine_error")
        }
        JobError::Dropped => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
    }
}

fn error_response(status: StatusCode, kind: &'static str, message: String) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: ErrorDetail {
                message,
                r#type: kind,
            },
        }),
    )
        .into_response()
}

/// Buffered chat completion.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Response {
    let handle = match state.scheduler.submit(request).await {
        Ok(handle) => handle,
        Err(err) => {
            let (status, kind) = admission_status(&err);
            return error_response(status, kind, err.to_string());
        }
    };

    match handle.collect_buffered().await {
        Ok(done) => {
            let processing_time = done.usage.processing_time;
            (
                StatusCode::OK,
                Json(ChatResponse {
                    response: done.text,
                    usage: done.usage,
                    model: state.model_id.clone(),
                    processing_time,
                }),
            )
                .into_response()
        }
        Err(err) => {
            let (status, kind) = job_status(&err);
            error_response(status, kind, err.to_string())
        }
    }
}

/// Incremental chat completion over server-sent events.
///
/// Dropping the connection drops the event stream, which the scheduler
/// observes as a cancellation at the next fragment boundary.
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Response {
    match state.scheduler.submit(request).await {
        Ok(handle) => {
            let id = handle.id();
            chat_stream_sse(id, state.model_id.clone(), handle.into_stream()).into_response()
        }
        Err(err) => {
            let (status, kind) = admission_status(&err);
            error_response(status, kind, err.to_string())
        }
    }
}

/// Readiness/liveness probe.
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    match state.health.snapshot().await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "model_loaded": false,
                "error": err.to_string(),
            })),
        )
            .into_response(),
    }
}

/// Available model listing.
pub async fn models(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        Json(ModelsResponse {
            models: vec![ModelInfo {
                id: state.model_id.clone(),
                object: "model",
                created: chrono::Utc::now().timestamp(),
                owned_by: "local",
            }],
        }),
    )
        .into_response()
}

/// Service banner.
pub async fn root(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "message": "konro chat-completion gateway",
            "version": env!("CARGO_PKG_VERSION"),
            "model": state.model_id,
            "status": "running",
        })),
    )
        .into_response()
}
