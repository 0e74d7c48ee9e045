//! Client for Whisper-compatible transcription servers
//! (`POST /v1/audio/transcriptions`, OpenAI request shape).

use super::{RecognitionError, Transcriber, Transcript};
use crate::audio::pcm::encode_wav;
use crate::config::RecognitionConfig;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
    /// Only present with `response_format=verbose_json`
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default)]
    avg_logprob: Option<f64>,
}

impl WhisperResponse {
    /// Mean per-segment probability; servers that report nothing get 1.0.
    fn confidence(&self) -> f64 {
        let probs: Vec<f64> = self
            .segments
            .iter()
            .filter_map(|s| s.avg_logprob)
            .map(|lp| lp.exp().clamp(0.0, 1.0))
            .collect();
        if probs.is_empty() {
            1.0
        } else {
            probs.iter().sum::<f64>() / probs.len() as f64
        }
    }
}

pub struct WhisperClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
}

impl WhisperClient {
    pub fn new(config: &RecognitionConfig) -> Result<Self, RecognitionError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!(
                "{}/v1/audio/transcriptions",
                config.backend_url.trim().trim_end_matches('/')
            ),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Transcriber for WhisperClient {
    async fn transcribe(
        &self,
        samples: &[i16],
        sample_rate: u32,
        language: &str,
    ) -> Result<Transcript, RecognitionError> {
        if samples.is_empty() {
            return Ok(Transcript {
                text: String::new(),
                confidence: 0.0,
            });
        }

        let wav_bytes = encode_wav(samples, sample_rate)?;
        let file_part = Part::bytes(wav_bytes)
            .file_name("utterance.wav")
            .mime_str("audio/wav")?;

        let mut form = Form::new()
            .part("file", file_part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");
        if !language.is_empty() && language != "auto" {
            form = form.text("language", language.to_string());
        }

        debug!(
            endpoint = %self.endpoint,
            samples = samples.len(),
            "Sending utterance to transcription backend"
        );
        let response = self.http.post(&self.endpoint).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RecognitionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: WhisperResponse = response.json().await?;
        Ok(Transcript {
            confidence: parsed.confidence(),
            text: parsed.text.trim().to_string(),
        })
    }

    fn describe(&self) -> String {
        format!("whisper ({}) at {}", self.model, self.endpoint)
    }
}
