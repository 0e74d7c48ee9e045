//! Ollama-backed corrector (`/api/generate`, non-streaming).

use super::{CorrectionError, Corrector};
use crate::config::CorrectionConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

pub struct OllamaCorrector {
    http: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    system_prompt: String,
}

impl OllamaCorrector {
    pub fn new(config: &CorrectionConfig) -> Result<Self, CorrectionError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.ollama_url.trim().trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            system_prompt: config.system_prompt.clone(),
        })
    }
}

#[async_trait]
impl Corrector for OllamaCorrector {
    async fn correct(&self, text: &str) -> Result<String, CorrectionError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(String::new());
        }

        let request = GenerateRequest {
            model: &self.model,
            prompt: text,
            system: &self.system_prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
            },
        };

        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CorrectionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let generated: GenerateResponse = response.json().await?;
        if !generated.done {
            return Err(CorrectionError::Incomplete);
        }

        let corrected = generated.response.trim().to_string();
        debug!(
            original_chars = text.len(),
            corrected_chars = corrected.len(),
            "Text corrected"
        );
        Ok(corrected)
    }

    async fn health_check(&self) -> Result<(), CorrectionError> {
        let response = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CorrectionError::Status {
                status: status.as_u16(),
                body: String::new(),
            });
        }

        let tags: TagsResponse = response.json().await?;
        if tags.models.iter().any(|m| m.name.starts_with(&self.model)) {
            Ok(())
        } else {
            Err(CorrectionError::ModelMissing(self.model.clone()))
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{web, App, HttpResponse, HttpServer};
    use serde_json::{json, Value};

    async fn fake_generate(body: web::Json<Value>) -> HttpResponse {
        if body["stream"] != json!(false) || body["system"].as_str().unwrap_or("").is_empty() {
            return HttpResponse::BadRequest().finish();
        }
        match body["prompt"].as_str() {
            Some("unfinished") => HttpResponse::Ok().json(json!({ "response": "", "done": false })),
            Some(prompt) => HttpResponse::Ok().json(json!({
                "response": format!("  {}.  ", prompt.to_uppercase()),
                "done": true
            })),
            None => HttpResponse::BadRequest().finish(),
        }
    }

    async fn fake_tags() -> HttpResponse {
        HttpResponse::Ok().json(json!({ "models": [{ "name": "gemma2:2b-instruct-q4" }] }))
    }

    async fn corrector_with_server(model: &str) -> (OllamaCorrector, actix_web::dev::ServerHandle) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = HttpServer::new(|| {
            App::new()
                .route("/api/generate", web::post().to(fake_generate))
                .route("/api/tags", web::get().to(fake_tags))
        })
        .workers(1)
        .listen(listener)
        .unwrap()
        .run();
        let handle = server.handle();
        actix_web::rt::spawn(server);

        let corrector = OllamaCorrector::new(&CorrectionConfig {
            ollama_url: format!("http://{}", addr),
            model: model.to_string(),
            ..CorrectionConfig::default()
        })
        .unwrap();
        (corrector, handle)
    }

    #[actix_web::test]
    async fn test_correct_trims_and_returns_response() {
        let (corrector, handle) = corrector_with_server("gemma2:2b").await;

        assert_eq!(corrector.correct("  hello there ").await.unwrap(), "HELLO THERE.");
        assert_eq!(corrector.correct("   ").await.unwrap(), "");
        assert!(matches!(
            corrector.correct("unfinished").await,
            Err(CorrectionError::Incomplete)
        ));

        handle.stop(false).await;
    }

    #[actix_web::test]
    async fn test_health_check_matches_model_prefix() {
        let (corrector, handle) = corrector_with_server("gemma2:2b").await;
        assert!(corrector.health_check().await.is_ok());
        handle.stop(false).await;

        let (corrector, handle) = corrector_with_server("llama3").await;
        assert!(matches!(
            corrector.health_check().await,
            Err(CorrectionError::ModelMissing(_))
        ));
        handle.stop(false).await;
    }

    #[actix_web::test]
    async fn test_unreachable_backend() {
        let corrector = OllamaCorrector::new(&CorrectionConfig {
            ollama_url: "http://127.0.0.1:9".to_string(),
            ..CorrectionConfig::default()
        })
        .unwrap();
        assert!(matches!(
            corrector.correct("hi").await,
            Err(CorrectionError::Request(_))
        ));
    }
}
