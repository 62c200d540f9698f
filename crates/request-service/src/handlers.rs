//! API handlers for the Request Service

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use text2iac_common::{Error, InfrastructureRequest};
use tracing::{error, info};

use crate::{
    intake::{classify, parse_email, InboundEmail},
    models::{CancelResponse, RequestorRequestsResponse, SubmitRequest, SubmitResponse},
    orchestrator::Orchestrator,
};

/// Shared application state
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// API Error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message
        });

        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Terminal { .. } => StatusCode::CONFLICT,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("Request handling failed: {}", err);
        }

        ApiError {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

/// Health check
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.orchestrator.health_check().await {
        Ok(()) => Json(serde_json::json!({
            "status": "healthy",
            "service": "request-service"
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "unhealthy",
                "service": "request-service",
                "error": e.to_string()
            })),
        )
            .into_response(),
    }
}

/// Submit a new infrastructure request
pub async fn submit_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let Json(payload) = payload?;

    let request = state.orchestrator.submit(payload.into()).await?;
    info!("Request submitted: {}", request.id);

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse::accepted(&request))))
}

/// Get request status
pub async fn get_request_handler(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Result<Json<InfrastructureRequest>, ApiError> {
    let request = state.orchestrator.get_status(&request_id).await?;
    Ok(Json(request))
}

/// Cancel a request
pub async fn cancel_request_handler(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    info!("Cancelling request: {}", request_id);

    let request = state.orchestrator.cancel(&request_id).await?;

    Ok(Json(CancelResponse {
        request_id: request.id,
        status: request.status,
        message: request.message,
    }))
}

/// Get all requests for a requestor
pub async fn get_requestor_requests_handler(
    State(state): State<Arc<AppState>>,
    Path(requestor): Path<String>,
) -> Result<Json<RequestorRequestsResponse>, ApiError> {
    let requests = state.orchestrator.list_by_requestor(&requestor).await?;

    Ok(Json(RequestorRequestsResponse {
        requestor,
        requests,
    }))
}

/// Request counts by status
pub async fn get_stats_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state.orchestrator.stats().await?;

    Ok(Json(serde_json::json!({
        "requests": stats,
        "inFlight": state.orchestrator.in_flight()
    })))
}

/// Accept an infrastructure request sent by email
pub async fn email_intake_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<InboundEmail>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let Json(email) = payload?;

    let Some(submission) = parse_email(&email) else {
        return Err(ApiError {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: format!(
                "Not an infrastructure request: classified as {} (subject \"{}\")",
                classify(&email).describe(),
                email.subject
            ),
        });
    };

    let request = state.orchestrator.submit(submission).await?;
    info!("Email request from {} submitted: {}", email.from, request.id);

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse::accepted(&request))))
}
