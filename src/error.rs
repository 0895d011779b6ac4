//! Error taxonomy for the analysis pipeline and its HTTP mapping.
//!
//! Every failure a caller can observe carries a stable error code and maps
//! to a structured JSON body. Internal detail (provider payloads, file
//! contents, credentials) never reaches the response.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

/// Configuration resolution errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration key '{key}'")]
    MissingKey { key: String },
    #[error("invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Failures surfaced by the analysis pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The declared content type or filename is not the supported format.
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// The upload exceeds the configured size limit.
    #[error("document is {size} bytes, exceeding the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// The bytes could not be parsed as a DOCX document.
    #[error("failed to parse document: {0}")]
    CorruptDocument(String),

    /// The multipart submission is missing or malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Per-client request rate exceeded.
    #[error("request rate limit exceeded")]
    RateLimitExceeded,

    /// Too many analyses already in flight.
    #[error("concurrent analysis limit exceeded")]
    ConcurrencyLimitExceeded,

    /// Document parsing exceeded the upload timeout.
    #[error("document parsing timed out")]
    UploadTimeout,

    /// The analysis provider call exceeded its timeout.
    #[error("analysis timed out")]
    AnalysisTimeout,

    /// The overall request exceeded its deadline.
    #[error("request timed out")]
    RequestTimeout,

    /// Transient provider failures persisted through all retries.
    #[error("analysis service unavailable: {0}")]
    AnalysisServiceUnavailable(String),

    /// The provider rejected the request (non-retryable).
    #[error("analysis provider error: {0}")]
    AnalysisProviderError(String),

    /// The provider reply could not be validated or repaired.
    #[error("malformed analysis response: {0}")]
    MalformedAnalysisResponse(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Stable machine-readable code for the error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::CorruptDocument(_) => "CORRUPT_DOCUMENT",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::ConcurrencyLimitExceeded => "CONCURRENCY_LIMIT_EXCEEDED",
            Self::UploadTimeout => "UPLOAD_TIMEOUT",
            Self::AnalysisTimeout => "ANALYSIS_TIMEOUT",
            Self::RequestTimeout => "REQUEST_TIMEOUT",
            Self::AnalysisServiceUnavailable(_) => "ANALYSIS_SERVICE_UNAVAILABLE",
            Self::AnalysisProviderError(_) => "ANALYSIS_PROVIDER_ERROR",
            Self::MalformedAnalysisResponse(_) => "MALFORMED_ANALYSIS_RESPONSE",
            Self::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::CorruptDocument(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::RateLimitExceeded | Self::ConcurrencyLimitExceeded => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Self::UploadTimeout | Self::AnalysisTimeout | Self::RequestTimeout => {
                StatusCode::GATEWAY_TIMEOUT
            }
            Self::AnalysisServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::AnalysisProviderError(_) | Self::MalformedAnalysisResponse(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Human-readable message for the response body. Internal errors get a
    /// generic message so implementation detail is never leaked.
    fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "An unexpected error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: String,
}

/// The structured error envelope: `{"status":"error","error":{...}}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub error: ErrorDetail,
}

impl ErrorBody {
    pub fn from_error(err: &PipelineError) -> Self {
        let details = match err {
            PipelineError::PayloadTooLarge { size, limit } => Some(serde_json::json!({
                "size_bytes": size,
                "limit_bytes": limit,
            })),
            _ => None,
        };
        Self {
            status: "error",
            error: ErrorDetail {
                code: err.code(),
                message: err.public_message(),
                details,
                timestamp: Utc::now().to_rfc3339(),
            },
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        if matches!(self, Self::Internal(_)) {
            tracing::error!(error = %self, "internal pipeline error");
        }
        (self.status(), Json(ErrorBody::from_error(&self))).into_response()
    }
}
