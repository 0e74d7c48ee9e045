//! # Speech Recognition
//!
//! The daemon does not run an acoustic model itself. It talks to a
//! recognizer through the [`Recognizer`] trait, one instance per session,
//! handed out by a shared [`RecognizerFactory`].
//!
//! ## Components:
//! - **Recognizer / RecognizerFactory**: the seam the streaming protocol and
//!   REST handlers depend on
//! - **Transcriber**: one-shot "samples in, text out" backend call
//! - **WhisperClient**: `Transcriber` for a Whisper-compatible HTTP server
//! - **UtteranceRecognizer**: `Recognizer` that cuts the stream into
//!   utterances with the VAD and sends each one to a `Transcriber`

pub mod utterance;
pub mod whisper;

use crate::audio::pcm::PcmError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use utterance::{UtteranceRecognizer, UtteranceRecognizerFactory};
pub use whisper::WhisperClient;

/// A finalized piece of transcript. Offsets are seconds from session start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub confidence: f64,
}

impl Segment {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("engine is closed")]
    Closed,

    #[error("transcription backend request failed: {0}")]
    Backend(String),

    #[error("transcription backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Audio(#[from] PcmError),
}

impl From<reqwest::Error> for RecognitionError {
    fn from(err: reqwest::Error) -> Self {
        RecognitionError::Backend(err.to_string())
    }
}

/// Per-session streaming recognizer. Not shared between sessions.
#[async_trait]
pub trait Recognizer: Send {
    /// Forget any audio and partial hypothesis from a previous use.
    async fn reset_state(&mut self) -> Result<(), RecognitionError>;

    /// Feed samples; returns whatever segments became final because of them.
    async fn accept_audio(&mut self, samples: &[i16]) -> Result<Vec<Segment>, RecognitionError>;

    /// Current unstable hypothesis, empty when there is none.
    async fn partial_result(&mut self) -> Result<String, RecognitionError>;

    /// Flush everything still pending. An empty segment means nothing was left.
    async fn final_result(&mut self) -> Result<Segment, RecognitionError>;

    /// Release resources. Every later call fails with [`RecognitionError::Closed`].
    async fn close(&mut self) -> Result<(), RecognitionError>;
}

/// Hands out one fresh recognizer per session.
pub trait RecognizerFactory: Send + Sync {
    /// `language` may be empty, meaning "the configured default".
    fn create(&self, language: &str) -> Result<Box<dyn Recognizer>, RecognitionError>;

    /// Short description for the health endpoint.
    fn describe(&self) -> String;
}

/// Result of one backend transcription call.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub confidence: f64,
}

/// Batch transcription backend.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        samples: &[i16],
        sample_rate: u32,
        language: &str,
    ) -> Result<Transcript, RecognitionError>;

    fn describe(&self) -> String;
}
