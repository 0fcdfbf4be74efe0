//! API error handling for consistent JSON error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::transcription::TranscriptionError;

/// API error type that converts to JSON responses.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": true,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<TranscriptionError> for ApiError {
    fn from(err: TranscriptionError) -> Self {
        let status = match &err {
            TranscriptionError::MeetingNotFound(_)
            | TranscriptionError::MeetingNotFoundForJob(_)
            | TranscriptionError::NoJob(_) => StatusCode::NOT_FOUND,
            TranscriptionError::JobAlreadyInProgress { .. }
            | TranscriptionError::NotReady { .. } => StatusCode::CONFLICT,
            TranscriptionError::UnsupportedFeatures { .. }
            | TranscriptionError::NoCapableProvider { .. }
            | TranscriptionError::MalformedPayload(_)
            | TranscriptionError::NoAudio(_) => StatusCode::BAD_REQUEST,
            TranscriptionError::ProviderNotConfigured { .. } => StatusCode::SERVICE_UNAVAILABLE,
            TranscriptionError::Request { .. } => StatusCode::BAD_GATEWAY,
            TranscriptionError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
