//! API error types.

use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use scm_queue::QueueError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Queue(QueueError::JobNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Queue(QueueError::InvalidPayload(_) | QueueError::WrongQueue { .. }) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Queue(QueueError::JobNotFound(_)) => "Job not found".to_string(),
            ApiError::Queue(QueueError::InvalidPayload(msg)) => msg.clone(),
            _ => self.to_string(),
        }
    }
}

/// Malformed or incomplete request bodies are client errors.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// JSON body extractor whose rejections use the API error shape.
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = if status.is_server_error() {
            error!("Request failed: {}", self);
            // Don't expose internal error details in production
            if std::env::var("ENVIRONMENT").is_ok_and(|e| e.eq_ignore_ascii_case("production")) {
                "An internal error occurred".to_string()
            } else {
                self.message()
            }
        } else {
            self.message()
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_errors_map_to_http_status() {
        assert_eq!(
            ApiError::from(QueueError::job_not_found("j1")).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(QueueError::invalid_payload("width must be even")).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(QueueError::connection_failed("refused")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn not_found_message_hides_the_id() {
        assert_eq!(ApiError::from(QueueError::job_not_found("j1")).message(), "Job not found");
        assert_eq!(ApiError::bad_request("jobId is required").message(), "jobId is required");
    }
}
