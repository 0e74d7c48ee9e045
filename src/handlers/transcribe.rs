use crate::audio::pcm::{decode_base64_payload, PcmError};
use crate::error::{AppError, AppResult};
use crate::recognition::{Recognizer, Segment};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeRequest {
    #[serde(default, alias = "audio")]
    pub audio_base64: Option<String>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub language: String,
}

#[derive(Debug, Serialize)]
pub struct TranscribeResponse {
    pub text: String,
    pub confidence: f64,
    pub segments: Vec<Segment>,
}

impl TranscribeResponse {
    fn from_segments(segments: Vec<Segment>) -> Self {
        let text = segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let confidence = if segments.is_empty() {
            0.0
        } else {
            segments.iter().map(|s| s.confidence).sum::<f64>() / segments.len() as f64
        };
        Self {
            text,
            confidence,
            segments,
        }
    }
}

/// `POST /api/v1/transcribe`: one-shot transcription of a base64 payload.
pub async fn transcribe(
    state: web::Data<AppState>,
    body: web::Json<TranscribeRequest>,
) -> AppResult<HttpResponse> {
    let request = body.into_inner();
    let expected_rate = state.config.recognition.sample_rate;

    let encoded = request
        .audio_base64
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| AppError::BadRequest("audio field is required".to_string()))?;

    if let Some(actual) = request.sample_rate {
        if actual != expected_rate {
            return Err(PcmError::SampleRateMismatch {
                expected: expected_rate,
                actual,
            }
            .into());
        }
    }

    let audio = decode_base64_payload(encoded)?;
    audio.ensure_rate(expected_rate)?;

    let mut recognizer = state.recognizers.create(&request.language)?;
    let result = run_recognizer(recognizer.as_mut(), &audio.samples, expected_rate).await;
    if let Err(err) = recognizer.close().await {
        warn!(error = %err, "Failed to close recognizer");
    }
    let segments = result?;

    let response = TranscribeResponse::from_segments(segments);
    info!(
        samples = audio.samples.len(),
        segments = response.segments.len(),
        chars = response.text.len(),
        "Transcription completed"
    );
    Ok(HttpResponse::Ok().json(response))
}

/// Feed the samples in 100 ms chunks, then drain whatever is left.
async fn run_recognizer(
    recognizer: &mut dyn Recognizer,
    samples: &[i16],
    sample_rate: u32,
) -> AppResult<Vec<Segment>> {
    recognizer.reset_state().await?;

    let chunk_len = (sample_rate as usize / 10).max(1);
    let mut segments = Vec::new();
    for chunk in samples.chunks(chunk_len) {
        segments.extend(recognizer.accept_audio(chunk).await?);
    }

    let last = recognizer.final_result().await?;
    if !last.is_empty() {
        segments.push(last);
    }
    segments.retain(|s| !s.is_empty());
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::json_config;
    use crate::state::tests::test_state;
    use actix_web::{http::StatusCode, test, App};
    use base64::{engine::general_purpose, Engine as _};
    use serde_json::{json, Value};

    fn pcm_base64(samples: &[i16]) -> String {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        general_purpose::STANDARD.encode(bytes)
    }

    async fn post(body: Value) -> (StatusCode, Value) {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state(None)))
                .app_data(json_config())
                .route("/transcribe", web::post().to(transcribe)),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/transcribe")
            .set_json(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        let status = resp.status();
        (status, test::read_body_json(resp).await)
    }

    #[actix_web::test]
    async fn test_segments_are_joined() {
        // every 1600-sample chunk starts with a positive sample, so each one
        // finalizes a segment
        let (status, body) = post(json!({ "audioBase64": pcm_base64(&[5; 3200]) })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["text"], "segment 5 segment 5");
        assert_eq!(body["confidence"], 0.8);
        assert_eq!(body["segments"].as_array().unwrap().len(), 2);
        assert_eq!(body["segments"][0]["text"], "segment 5");
    }

    #[actix_web::test]
    async fn test_pending_audio_is_flushed() {
        let (status, body) = post(json!({ "audio": pcm_base64(&[0; 800]), "sampleRate": 16000 })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["text"], "tail");
        assert_eq!(body["confidence"], 0.6);
    }

    #[actix_web::test]
    async fn test_validation_errors() {
        let (status, body) = post(json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "audio field is required");

        let (status, body) = post(json!({ "audioBase64": "!!not base64!!" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "invalid base64 audio data");

        let (status, body) = post(json!({ "audioBase64": "AAAA" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["message"].as_str().unwrap().contains("even"));

        let (status, body) =
            post(json!({ "audioBase64": pcm_base64(&[1, 2]), "sampleRate": 44100 })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"]["message"],
            "sample rate mismatch: expected 16000 Hz, got 44100 Hz"
        );
    }

    #[actix_web::test]
    async fn test_wav_payload_rate_is_checked() {
        let wav = crate::audio::pcm::encode_wav(&[0; 400], 8000).unwrap();
        let (status, body) =
            post(json!({ "audioBase64": general_purpose::STANDARD.encode(wav) })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"]["message"],
            "sample rate mismatch: expected 16000 Hz, got 8000 Hz"
        );
    }

    #[actix_web::test]
    async fn test_malformed_json_is_bad_request() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state(None)))
                .app_data(json_config())
                .route("/transcribe", web::post().to(transcribe)),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/transcribe")
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "bad_request");
    }
}
