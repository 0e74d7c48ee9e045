//! VAD-gated streaming recognizer.
//!
//! Audio is buffered in a [`RingBuffer`] while the detector watches it.
//! Before speech starts only a short pre-roll is kept; once speech has been
//! detected everything is kept until the detector falls back to silence, and
//! the whole utterance goes to the [`Transcriber`] in one request. Speech
//! that outgrows the buffer is flushed early so no audio is overwritten.

use super::{RecognitionError, Recognizer, RecognizerFactory, Segment, Transcriber};
use crate::audio::{RingBuffer, VadConfig, VoiceActivityDetector};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Audio kept ahead of detected speech so word onsets are not clipped.
const PREROLL_MS: u64 = 300;

pub struct UtteranceRecognizer {
    transcriber: Arc<dyn Transcriber>,
    language: String,
    sample_rate: u32,
    buffer: RingBuffer,
    vad: VoiceActivityDetector,
    preroll_samples: usize,
    in_utterance: bool,
    /// Samples accepted since the last reset
    position: u64,
    closed: bool,
}

impl UtteranceRecognizer {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        language: String,
        vad: VadConfig,
        max_utterance_secs: u32,
    ) -> Self {
        let sample_rate = vad.sample_rate;
        let capacity = sample_rate as usize * max_utterance_secs as usize;
        let preroll_samples =
            (PREROLL_MS * u64::from(sample_rate) / 1000).min(capacity as u64) as usize;
        Self {
            transcriber,
            language,
            sample_rate,
            buffer: RingBuffer::new(capacity),
            vad: VoiceActivityDetector::new(vad),
            preroll_samples,
            in_utterance: false,
            position: 0,
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<(), RecognitionError> {
        if self.closed {
            Err(RecognitionError::Closed)
        } else {
            Ok(())
        }
    }

    fn seconds(&self, samples: u64) -> f64 {
        samples as f64 / f64::from(self.sample_rate)
    }

    /// Drop silence older than the pre-roll window.
    fn trim_preroll(&self) {
        let excess = self.buffer.available().saturating_sub(self.preroll_samples);
        self.buffer.discard(excess);
    }

    /// Transcribe and clear everything buffered.
    async fn flush(&mut self) -> Result<Option<Segment>, RecognitionError> {
        let samples = self.buffer.drain();
        if samples.is_empty() {
            return Ok(None);
        }

        let start = self.position - samples.len() as u64;
        let transcript = self
            .transcriber
            .transcribe(&samples, self.sample_rate, &self.language)
            .await?;
        debug!(
            samples = samples.len(),
            chars = transcript.text.len(),
            "Utterance transcribed"
        );

        if transcript.text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(Segment {
            text: transcript.text,
            start: self.seconds(start),
            end: self.seconds(self.position),
            confidence: transcript.confidence,
        }))
    }
}

#[async_trait]
impl Recognizer for UtteranceRecognizer {
    async fn reset_state(&mut self) -> Result<(), RecognitionError> {
        self.ensure_open()?;
        self.buffer.reset();
        self.vad.reset();
        self.in_utterance = false;
        self.position = 0;
        Ok(())
    }

    async fn accept_audio(&mut self, samples: &[i16]) -> Result<Vec<Segment>, RecognitionError> {
        self.ensure_open()?;
        let mut segments = Vec::new();
        if samples.is_empty() {
            return Ok(segments);
        }

        let speech = self.vad.process(samples);

        if self.in_utterance && self.buffer.available() + samples.len() > self.buffer.capacity() {
            segments.extend(self.flush().await?);
        }
        self.buffer.write_force(samples);
        self.position += samples.len() as u64;

        match (self.in_utterance, speech) {
            (false, true) => self.in_utterance = true,
            (true, false) => {
                self.in_utterance = false;
                segments.extend(self.flush().await?);
            }
            (false, false) => self.trim_preroll(),
            (true, true) => {}
        }

        Ok(segments)
    }

    async fn partial_result(&mut self) -> Result<String, RecognitionError> {
        self.ensure_open()?;
        // utterances are only transcribed once complete
        Ok(String::new())
    }

    async fn final_result(&mut self) -> Result<Segment, RecognitionError> {
        self.ensure_open()?;
        let segment = if self.in_utterance {
            self.flush().await?
        } else {
            self.buffer.reset();
            None
        };
        self.in_utterance = false;
        self.vad.reset();
        Ok(segment.unwrap_or_default())
    }

    async fn close(&mut self) -> Result<(), RecognitionError> {
        self.closed = true;
        self.buffer.reset();
        Ok(())
    }
}

/// Builds [`UtteranceRecognizer`]s that share one transcription backend.
pub struct UtteranceRecognizerFactory {
    transcriber: Arc<dyn Transcriber>,
    vad: VadConfig,
    default_language: String,
    max_utterance_secs: u32,
}

impl UtteranceRecognizerFactory {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        vad: VadConfig,
        default_language: String,
        max_utterance_secs: u32,
    ) -> Self {
        Self {
            transcriber,
            vad,
            default_language,
            max_utterance_secs,
        }
    }
}

impl RecognizerFactory for UtteranceRecognizerFactory {
    fn create(&self, language: &str) -> Result<Box<dyn Recognizer>, RecognitionError> {
        let language = if language.trim().is_empty() {
            self.default_language.clone()
        } else {
            language.trim().to_string()
        };
        Ok(Box::new(UtteranceRecognizer::new(
            Arc::clone(&self.transcriber),
            language,
            self.vad.clone(),
            self.max_utterance_secs,
        )))
    }

    fn describe(&self) -> String {
        self.transcriber.describe()
    }
}
