//! REST endpoints for onboarding sessions.
//!
//! Every response uses the `{success, data, error}` envelope.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use super::service::{
    HealthStatus, LinkTicketRequest, MessageRequest, OnboardingService, StartRequest,
};
use crate::error::{Error, SessionError};

/// Response envelope shared by all endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::ok(data))).into_response()
}

fn fail(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::failure(message))).into_response()
}

/// HTTP status for a service error.
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Session(SessionError::NotFound { .. }) => StatusCode::NOT_FOUND,
        Error::Session(SessionError::Validation { .. }) => StatusCode::BAD_REQUEST,
        Error::Session(SessionError::StoreCorruption { .. }) | Error::Config(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        Error::Ticket(_) => StatusCode::BAD_GATEWAY,
    }
}

fn error_response(err: Error) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(error = %err, status = status.as_u16(), "Onboarding request failed");
    } else {
        warn!(error = %err, status = status.as_u16(), "Onboarding request rejected");
    }
    fail(status, err.to_string())
}

/// Build the onboarding routes, with CORS and request tracing.
pub fn onboarding_routes(service: Arc<OnboardingService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/onboarding/start", post(start_session))
        .route("/api/v1/onboarding/message", post(post_message))
        .route("/api/v1/onboarding/status/{session_id}", get(get_status))
        .route("/api/v1/onboarding/sessions", get(list_sessions))
        .route("/api/v1/onboarding/sessions/{session_id}/sync", post(retry_sync))
        .route("/api/v1/onboarding/sessions/{session_id}/ticket", post(link_ticket))
        .with_state(service)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(service): State<Arc<OnboardingService>>) -> Response {
    let report = service.health_check().await;
    let status = match report.status {
        HealthStatus::Ok => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(ApiResponse::ok(report))).into_response()
}

// ── Sessions ────────────────────────────────────────────────────────────

async fn start_session(
    State(service): State<Arc<OnboardingService>>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return fail(rejection.status(), rejection.body_text()),
    };
    match service.start_session(req).await {
        Ok(started) => (StatusCode::CREATED, Json(ApiResponse::ok(started))).into_response(),
        Err(e) => error_response(e),
    }
}

async fn post_message(
    State(service): State<Arc<OnboardingService>>,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return fail(rejection.status(), rejection.body_text()),
    };
    match service.post_message(req).await {
        Ok(reply) => ok(reply),
        Err(e) => error_response(e),
    }
}

async fn get_status(
    State(service): State<Arc<OnboardingService>>,
    Path(session_id): Path<String>,
) -> Response {
    match service.get_status(&session_id).await {
        Ok(status) => ok(status),
        Err(e) => error_response(e),
    }
}

async fn list_sessions(State(service): State<Arc<OnboardingService>>) -> Response {
    ok(service.list_sessions().await)
}

async fn retry_sync(
    State(service): State<Arc<OnboardingService>>,
    Path(session_id): Path<String>,
) -> Response {
    match service.retry_sync(&session_id).await {
        Ok(status) => ok(status),
        Err(e) => error_response(e),
    }
}

async fn link_ticket(
    State(service): State<Arc<OnboardingService>>,
    Path(session_id): Path<String>,
    payload: Result<Json<LinkTicketRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return fail(rejection.status(), rejection.body_text()),
    };
    match service.link_ticket(&session_id, &req.ticket_id).await {
        Ok(status) => ok(status),
        Err(e) => error_response(e),
    }
}
