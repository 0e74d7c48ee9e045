use crate::correction::CorrectionError;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

const CORRECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct CorrectRequest {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct CorrectResponse {
    pub original: String,
    pub corrected: String,
    pub model: String,
}

/// `POST /api/v1/correct`
///
/// The body is parsed only after the corrector is known to exist, so a
/// disabled corrector answers 503 whatever the client sent.
pub async fn correct(state: web::Data<AppState>, body: web::Bytes) -> AppResult<HttpResponse> {
    let corrector = state
        .corrector
        .as_ref()
        .ok_or_else(|| AppError::ServiceUnavailable("text correction is disabled".to_string()))?;

    let original = serde_json::from_slice::<CorrectRequest>(&body)?.text;
    if original.trim().is_empty() {
        return Err(AppError::BadRequest("text field is required".to_string()));
    }

    // shutdown abandons the call along with everything else under the root scope
    let corrected = state
        .root_scope
        .child()
        .run(CORRECT_TIMEOUT, corrector.correct(&original))
        .await
        .map_err(CorrectionError::from)??;

    info!(
        model = corrector.model_name(),
        original_chars = original.len(),
        corrected_chars = corrected.len(),
        "Correction completed"
    );
    Ok(HttpResponse::Ok().json(CorrectResponse {
        original,
        corrected,
        model: corrector.model_name().to_string(),
    }))
}
