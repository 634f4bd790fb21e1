use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use crate::admission::AdmissionError;
use crate::ledger::LedgerError;

use super::models::{ErrorBody, ErrorEnvelope};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("{0}")]
    UnsupportedMedia(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("rate limit exceeded, retry later")]
    RateLimited,
    #[error("{0}")]
    UpstreamTimeout(String),
    #[error("{0}")]
    UpstreamRateLimit(String),
    #[error("{0}")]
    SchemaInvalid(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::UpstreamTimeout(_)
            | ApiError::UpstreamRateLimit(_)
            | ApiError::SchemaInvalid(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            // 413/415 carry the INVALID_ARGUMENT code; the status tells the
            // transport story, the code stays within the taxonomy.
            ApiError::InvalidArgument(_)
            | ApiError::PayloadTooLarge(_)
            | ApiError::UnsupportedMedia(_) => "INVALID_ARGUMENT",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::RateLimited => "RATE_LIMITED",
            ApiError::UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
            ApiError::UpstreamRateLimit(_) => "UPSTREAM_RATE_LIMIT",
            ApiError::SchemaInvalid(_) => "SCHEMA_INVALID",
            ApiError::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidArgument(value.to_string())
    }
}

impl From<AdmissionError> for ApiError {
    fn from(value: AdmissionError) -> Self {
        match value {
            AdmissionError::InvalidArgument(message) => ApiError::InvalidArgument(message),
            AdmissionError::Internal(message) => ApiError::Internal(message),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::NotFound(what) => ApiError::NotFound(what),
            LedgerError::Conflict(message) => ApiError::Conflict(message),
            LedgerError::InvalidArgument(message) => ApiError::InvalidArgument(message),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Map a failed job's stored error message to a taxonomy code by keyword.
pub fn code_for_job_error(message: &str) -> &'static str {
    let lowered = message.to_lowercase();
    if lowered.contains("schema invalid")
        || lowered.contains("invalid json")
        || lowered.contains("out of range")
        || lowered.contains("empty")
    {
        return "SCHEMA_INVALID";
    }
    if lowered.contains("rate limit") {
        return "UPSTREAM_RATE_LIMIT";
    }
    if lowered.contains("timeout") || lowered.contains("deadline exceeded") {
        return "UPSTREAM_TIMEOUT";
    }
    if lowered.contains("not found") {
        return "NOT_FOUND";
    }
    if lowered.contains("invalid argument") {
        return "INVALID_ARGUMENT";
    }
    "INTERNAL"
}
