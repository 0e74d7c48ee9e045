use crate::correction::Corrector;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::time::Duration;

const CORRECTION_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// `GET /api/v1/health`, the one endpoint that needs no token.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let correction = correction_status(state.corrector.as_deref()).await;
    let metrics = state.get_metrics_snapshot();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "transcription": state.recognizers.describe(),
            "correction": correction
        },
        "uptimeSeconds": state.get_uptime_seconds(),
        "activeSessions": metrics.active_sessions,
        "totalRequests": metrics.request_count
    }))
}

/// `ready`, `disabled`, or `unavailable: <reason>`.
async fn correction_status(corrector: Option<&dyn Corrector>) -> String {
    let Some(corrector) = corrector else {
        return "disabled".to_string();
    };
    match tokio::time::timeout(CORRECTION_CHECK_TIMEOUT, corrector.health_check()).await {
        Ok(Ok(())) => "ready".to_string(),
        Ok(Err(err)) => format!("unavailable: {}", err),
        Err(_) => format!("unavailable: no answer within {:?}", CORRECTION_CHECK_TIMEOUT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correction::CorrectionError;
    use crate::state::tests::test_state;
    use crate::streaming::session::tests::{CorrectorMode, ScriptedCorrector};
    use actix_web::{test, App};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc;

    struct DownCorrector;

    #[async_trait]
    impl Corrector for DownCorrector {
        async fn correct(&self, _text: &str) -> Result<String, CorrectionError> {
            Err(CorrectionError::Incomplete)
        }

        async fn health_check(&self) -> Result<(), CorrectionError> {
            Err(CorrectionError::ModelMissing("gemma2:2b".to_string()))
        }

        fn model_name(&self) -> &str {
            "gemma2:2b"
        }
    }

    async fn get_health(corrector: Option<Arc<dyn Corrector>>) -> Value {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state(corrector)))
                .route("/health", web::get().to(health_check)),
        )
        .await;
        let req = test::TestRequest::get().uri("/health").to_request();
        test::call_and_read_body_json(&app, req).await
    }

    #[actix_web::test]
    async fn test_health_reports_services() {
        let body = get_health(None).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["services"]["transcription"], "scripted");
        assert_eq!(body["services"]["correction"], "disabled");
        assert!(body["uptimeSeconds"].is_u64());

        let body = get_health(Some(Arc::new(ScriptedCorrector(CorrectorMode::Uppercase)))).await;
        assert_eq!(body["services"]["correction"], "ready");
    }

    #[actix_web::test]
    async fn test_health_stays_healthy_when_correction_is_down() {
        let body = get_health(Some(Arc::new(DownCorrector))).await;
        assert_eq!(body["status"], "healthy");
        assert!(body["services"]["correction"]
            .as_str()
            .unwrap()
            .starts_with("unavailable: model gemma2:2b not found"));
    }
}
