//! # Error Handling
//!
//! HTTP-facing error type for the daemon. Every module keeps its own small
//! `thiserror` enum (`PcmError`, `RecognitionError`, `CorrectionError`, ...)
//! and the handlers fold those into [`AppError`] right before a response is
//! produced, so the JSON error body has one shape everywhere:
//!
//! ```json
//! {
//!   "error": {
//!     "type": "bad_request",
//!     "message": "audio field is required",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```
//!
//! ## Key Rust Concepts:
//! - **ResponseError trait**: actix turns any handler `Err(AppError)` into an HTTP response
//! - **From trait**: lets `?` convert domain errors without explicit `map_err`

use crate::audio::pcm::PcmError;
use crate::correction::CorrectionError;
use crate::recognition::RecognitionError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors a request can end with.
///
/// ## Status Mapping:
/// - **BadRequest** → 400
/// - **Unauthorized** → 401
/// - **TooManyRequests** → 429
/// - **ServiceUnavailable** → 503
/// - **Internal** → 500
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Missing or wrong bearer token
    Unauthorized(String),

    /// Per-client request budget exhausted for the current window
    TooManyRequests(String),

    /// An optional backend (correction) is switched off or unreachable
    ServiceUnavailable(String),

    /// Backend failures and anything else on our side
    Internal(String),
}

impl AppError {
    /// Machine-readable error kind used in the JSON body.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::TooManyRequests(_) => "rate_limited",
            AppError::ServiceUnavailable(_) => "service_unavailable",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// The bare message without the kind prefix used by `Display`.
    pub fn message(&self) -> &str {
        match self {
            AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::TooManyRequests(msg)
            | AppError::ServiceUnavailable(msg)
            | AppError::Internal(msg) => msg,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::TooManyRequests(msg) => write!(f, "Too many requests: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

/// Lets handlers return `Err(AppError)` directly.
///
/// ## Rust Concepts:
/// - **status_code**: picked by actix for the response line
/// - **error_response**: builds the JSON body shown in the module docs
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": self.kind(),
                "message": self.message(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Anything that bubbled up as `anyhow` is our problem, not the client's.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Malformed request bodies are always the client's fault.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

/// Undecodable audio, odd byte counts and rate mismatches are all 400s.
impl From<PcmError> for AppError {
    fn from(err: PcmError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

/// The transcription backend failed or the recognizer was already closed.
impl From<RecognitionError> for AppError {
    fn from(err: RecognitionError) -> Self {
        AppError::Internal(format!("transcription failed: {}", err))
    }
}

/// Backend errors, timeouts and shutdown cancellation of `/correct` calls.
impl From<CorrectionError> for AppError {
    fn from(err: CorrectionError) -> Self {
        AppError::Internal(format!("correction failed: {}", err))
    }
}

/// Shorthand for handler results.
pub type AppResult<T> = Result<T, AppError>;
