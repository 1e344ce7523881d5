//! Endpoint handlers.
//!
//! The predict handler only validates the id and checks the image exists;
//! everything past that is the coordinator's call, and each of its outcomes
//! maps to one status code.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dispatch::{DispatchCoordinator, DispatchError, QueueFailure, ResourceId};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<DispatchCoordinator>,
}

impl AppState {
    pub fn new(coordinator: DispatchCoordinator) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Predict
// =============================================================================

/// Body returned once every model queue has the image.
#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub message: &'static str,
    pub id: String,
    pub queues: Vec<String>,
}

/// Per-queue detail for partial failures.
#[derive(Debug, Serialize)]
pub struct FailedQueue {
    pub queue: String,
    pub reason: String,
}

impl From<QueueFailure> for FailedQueue {
    fn from(failure: QueueFailure) -> Self {
        Self {
            queue: failure.queue,
            reason: failure.reason,
        }
    }
}

/// Error body shared by every non-2xx answer.
#[derive(Debug, Default, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_queues: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_queues: Option<Vec<FailedQueue>>,
}

impl ErrorResponse {
    fn new(error: &'static str) -> Self {
        Self {
            error,
            ..Default::default()
        }
    }
}

fn error_response(status: StatusCode, body: ErrorResponse) -> Response {
    (status, Json(body)).into_response()
}

/// `GET /api/v1/images/:id/predict`
///
/// Pushes the image to every model queue, at most once per cooldown window.
pub async fn predict_image(State(state): State<AppState>, Path(raw_id): Path<String>) -> Response {
    let id = match Uuid::parse_str(&raw_id) {
        Ok(id) => ResourceId::from(id),
        Err(_) => {
            warn!(id = %raw_id, "predict_invalid_id");
            return error_response(StatusCode::BAD_REQUEST, ErrorResponse::new("Invalid ID format"));
        }
    };

    match state.coordinator.locate(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            info!(resource_id = %id, "predict_image_not_found");
            return error_response(StatusCode::NOT_FOUND, ErrorResponse::new("Image not found"));
        }
        Err(e) => {
            error!(resource_id = %id, error = %e, "predict_lookup_failed");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("Failed to look up image"),
            );
        }
    }

    match state.coordinator.request_dispatch(&id).await {
        Ok(ack) => {
            info!(resource_id = %id, queues = ack.queues.len(), "predict_dispatched");
            (
                StatusCode::OK,
                Json(PredictResponse {
                    message: "Image pushed to model queues",
                    id: ack.resource_id.to_string(),
                    queues: ack.queues,
                }),
            )
                .into_response()
        }
        Err(e) => dispatch_error_response(e),
    }
}

fn dispatch_error_response(err: DispatchError) -> Response {
    let retry_after = err.retry_after_secs();

    match err {
        DispatchError::RateLimited { .. } => {
            let secs = retry_after.unwrap_or_default();
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, secs.to_string())],
                Json(ErrorResponse {
                    retry_after_seconds: Some(secs),
                    ..ErrorResponse::new("Rate limited. Please wait before retrying.")
                }),
            )
                .into_response()
        }
        DispatchError::ResourceFetchFailed { source, .. } => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse {
                details: Some(source.to_string()),
                ..ErrorResponse::new("Failed to get image from storage")
            },
        ),
        DispatchError::PartialDispatchFailure {
            published, failed, ..
        } => error_response(
            StatusCode::BAD_GATEWAY,
            ErrorResponse {
                published_queues: Some(published),
                failed_queues: Some(failed.into_iter().map(FailedQueue::from).collect()),
                ..ErrorResponse::new("Image was not pushed to every model queue")
            },
        ),
        DispatchError::CooldownUnavailable(e) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorResponse {
                details: Some(format!("{:#}", e)),
                ..ErrorResponse::new("Cooldown store unavailable")
            },
        ),
        DispatchError::Encode(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse {
                details: Some(e.to_string()),
                ..ErrorResponse::new("Failed to encode prediction payload")
            },
        ),
    }
}
