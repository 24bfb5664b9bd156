//! API error type for csd-relay

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::db::StoreError;
use crate::mapping::ConfigError;
use crate::services::{PipelineError, WebhookError};

#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Signature check failed (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Conflict (409), e.g. an attempt already in flight
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Mapping reload rejected (422)
    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Common error: {0}")]
    Common(#[from] csd_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::InvalidMapping(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_MAPPING", msg)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ApiError::NotFound(format!("Submission {}", id)),
            StoreError::StateConflict { .. } => ApiError::Conflict(err.to_string()),
            StoreError::Database(e) => ApiError::Common(e),
            StoreError::IllegalTransition { .. } | StoreError::Corrupt { .. } => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Store(e) => e.into(),
            PipelineError::NotFound(_) => ApiError::NotFound(err.to_string()),
            PipelineError::NotRetryable(_) | PipelineError::InFlight(_) => {
                ApiError::Conflict(err.to_string())
            }
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::MissingSignature | WebhookError::InvalidSignature => {
                ApiError::Forbidden(err.to_string())
            }
            WebhookError::InvalidSecret => ApiError::Internal(err.to_string()),
            WebhookError::MalformedBody(_) | WebhookError::MissingSubmissionId => {
                ApiError::BadRequest(err.to_string())
            }
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::InvalidMapping(err.to_string())
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
