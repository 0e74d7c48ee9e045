//! # Text Correction
//!
//! Optional post-processing of recognized text (punctuation, capitalization,
//! light grammar fixes) by an LLM. Callers own timeouts and cancellation: a
//! corrector call is just a future, and dropping it abandons the request.

pub mod ollama;

use crate::streaming::ScopeError;
use async_trait::async_trait;
use thiserror::Error;

pub use ollama::OllamaCorrector;

#[derive(Debug, Error)]
pub enum CorrectionError {
    #[error("correction request failed: {0}")]
    Request(String),

    #[error("correction backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("correction backend did not finish generation")]
    Incomplete,

    #[error("model {0} not found in ollama, run: ollama pull {0}")]
    ModelMissing(String),

    #[error("correction timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("correction cancelled")]
    Cancelled,
}

/// A correction call abandoned by its caller's scope.
impl From<ScopeError> for CorrectionError {
    fn from(err: ScopeError) -> Self {
        match err {
            ScopeError::Cancelled => CorrectionError::Cancelled,
            ScopeError::TimedOut(limit) => CorrectionError::Timeout(limit),
        }
    }
}

impl From<reqwest::Error> for CorrectionError {
    fn from(err: reqwest::Error) -> Self {
        CorrectionError::Request(err.to_string())
    }
}

#[async_trait]
pub trait Corrector: Send + Sync {
    /// Return a corrected version of `text`. Blank input yields "".
    async fn correct(&self, text: &str) -> Result<String, CorrectionError>;

    /// Verify the backend is up and the model is available.
    async fn health_check(&self) -> Result<(), CorrectionError>;

    /// Model name reported back to clients.
    fn model_name(&self) -> &str;
}
