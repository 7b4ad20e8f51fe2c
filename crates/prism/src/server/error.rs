//! API error handling.
//!
//! Every failure leaves the server as `{code, message, details?}` JSON with a
//! matching status.

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use prism_core::BatchError;
use serde::Serialize;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// 422, for requests that parse but cannot be honored.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<BatchError> for ApiError {
    fn from(err: BatchError) -> Self {
        let message = err.to_string();
        match err {
            BatchError::InvalidSpecification { field, .. } => {
                ApiError::validation(message).with_details(serde_json::json!({ "field": field }))
            }
            BatchError::Backpressure { waited_ms } => ApiError::service_unavailable(message)
                .with_details(serde_json::json!({ "waitedMs": waited_ms })),
            BatchError::EmptyBatch | BatchError::TooManyItems { .. } => {
                ApiError::bad_request(message)
            }
            BatchError::NotFound(_) => ApiError::not_found(message),
            BatchError::NotFinished(_) => ApiError::conflict(message),
            BatchError::Archive(_) => {
                tracing::error!("Archive error: {}", message);
                ApiError::internal("Failed to build archive")
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::new(err.status(), "BAD_REQUEST", err.body_text())
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_error_statuses() {
        let cases = [
            (BatchError::invalid("quality", "out of range"), StatusCode::UNPROCESSABLE_ENTITY),
            (BatchError::Backpressure { waited_ms: 10 }, StatusCode::SERVICE_UNAVAILABLE),
            (BatchError::EmptyBatch, StatusCode::BAD_REQUEST),
            (BatchError::TooManyItems { count: 21, max: 20 }, StatusCode::BAD_REQUEST),
            (BatchError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (BatchError::NotFinished("x".into()), StatusCode::CONFLICT),
            (BatchError::Archive("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_invalid_specification_names_field() {
        let err = ApiError::from(BatchError::invalid("quality", "must be 1-100"));
        assert_eq!(err.code, "VALIDATION_ERROR");
        assert!(err.message.contains("quality"));
        assert_eq!(err.details.unwrap()["field"], "quality");
    }

    #[test]
    fn test_internal_errors_are_not_leaked() {
        let err = ApiError::from(BatchError::Archive("/var/lib/prism exploded".into()));
        assert!(!err.message.contains("/var/lib"));
    }
}
