//! # Local Microphone Dictation
//!
//! Optional mode that runs next to the HTTP server: audio from a
//! [`CaptureSession`] goes through a recognizer (and the corrector, when
//! enabled) and every finished utterance is reported as [`DictatedText`].
//!
//! The loop ends when the capture stream ends (the session was closed) or
//! when its cancel scope is cancelled. Either way the recognizer is flushed
//! and closed, and the capture session is closed.

use crate::audio::{CaptureError, CaptureSession};
use crate::correction::{CorrectionError, Corrector};
use crate::recognition::{RecognitionError, Recognizer, Segment};
use crate::streaming::CancelScope;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct DictatedText {
    pub raw: String,
    /// Present when correction ran and succeeded
    pub corrected: Option<String>,
}

impl DictatedText {
    /// What a user would want pasted: the corrected text if there is one.
    pub fn best(&self) -> &str {
        self.corrected.as_deref().unwrap_or(&self.raw)
    }
}

#[derive(Debug, Error)]
pub enum DictationError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Recognition(#[from] RecognitionError),
}

pub struct Dictation {
    capture: CaptureSession,
    recognizer: Box<dyn Recognizer>,
    output: Emitter,
}

/// Everything needed to turn a segment into [`DictatedText`]. Kept apart from
/// the recognizer so it can be borrowed while the recognizer is in use.
struct Emitter {
    corrector: Option<Arc<dyn Corrector>>,
    correction_timeout: Duration,
    scope: CancelScope,
}

impl Dictation {
    pub fn new(
        capture: CaptureSession,
        recognizer: Box<dyn Recognizer>,
        corrector: Option<Arc<dyn Corrector>>,
        correction_timeout: Duration,
        scope: CancelScope,
    ) -> Self {
        Self {
            capture,
            recognizer,
            output: Emitter {
                corrector,
                correction_timeout,
                scope,
            },
        }
    }

    /// Capture until closed or cancelled, sending each utterance to `output`.
    pub async fn run(mut self, output: mpsc::Sender<DictatedText>) -> Result<(), DictationError> {
        let mut chunks = self.capture.stream()?;
        let mut faults = self.capture.errors()?;
        self.recognizer.reset_state().await?;
        self.capture.start()?;
        info!("Dictation listening");

        let cancelled = self.output.scope.cancelled();
        tokio::pin!(cancelled);

        let result = loop {
            tokio::select! {
                _ = &mut cancelled => {
                    debug!("Dictation cancelled");
                    break Ok(());
                }
                Some(fault) = faults.next() => {
                    warn!(error = %fault, "Audio capture fault");
                }
                chunk = chunks.next() => {
                    let Some(chunk) = chunk else {
                        debug!("Capture stream ended");
                        break Ok(());
                    };
                    match self.recognizer.accept_audio(&chunk).await {
                        Ok(segments) => {
                            for segment in segments {
                                self.output.emit(segment, &output).await;
                            }
                        }
                        Err(err) => break Err(err.into()),
                    }
                }
            }
        };

        self.capture.close();
        match self.recognizer.final_result().await {
            Ok(segment) => self.output.emit(segment, &output).await,
            Err(err) => warn!(error = %err, "Failed to flush final dictation result"),
        }
        if let Err(err) = self.recognizer.close().await {
            warn!(error = %err, "Failed to close recognizer");
        }
        info!("Dictation stopped");
        result
    }
}

impl Emitter {
    async fn emit(&self, segment: Segment, output: &mpsc::Sender<DictatedText>) {
        if segment.is_empty() {
            return;
        }
        let raw = segment.text.trim().to_string();
        let corrected = self.correct(&raw).await;

        let text = DictatedText { raw, corrected };
        info!(text = %text.best(), "Dictated");
        if output.send(text).await.is_err() {
            debug!("Dictation output receiver dropped");
        }
    }

    async fn correct(&self, raw: &str) -> Option<String> {
        let corrector = self.corrector.as_ref()?;
        let result = self
            .scope
            .child()
            .run(self.correction_timeout, corrector.correct(raw))
            .await
            .map_err(CorrectionError::from)
            .and_then(|corrected| corrected);
        match result {
            Ok(corrected) if !corrected.is_empty() => Some(corrected),
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "Correction failed, keeping raw text");
                None
            }
        }
    }
}

/// Build the platform capture driver, when this build has one.
#[cfg(feature = "cpal-audio")]
pub fn platform_driver(
    device: Option<String>,
    params: crate::audio::CaptureParams,
) -> Option<Box<dyn crate::audio::CaptureDriver>> {
    Some(Box::new(crate::audio::cpal_driver::CpalDriver::new(device, params)))
}

#[cfg(not(feature = "cpal-audio"))]
pub fn platform_driver(
    _device: Option<String>,
    _params: crate::audio::CaptureParams,
) -> Option<Box<dyn crate::audio::CaptureDriver>> {
    None
}
