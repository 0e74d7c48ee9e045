//! # dictate-daemon
//!
//! Local dictation daemon. Editors and browser extensions on the same machine
//! talk to it over HTTP and WebSocket; it turns speech into text with a
//! Whisper-compatible backend and can clean the text up with a local LLM.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, `config.toml`, `DICTATE_*` env)
//! - **auth**: the bearer token shared with local clients
//! - **audio**: ring buffer, VAD, PCM/WAV decoding and microphone capture
//! - **recognition**: recognizer traits plus the Whisper HTTP backend
//! - **correction**: optional Ollama text correction
//! - **streaming**: the `/stream` protocol state machine and cancel scopes
//! - **middleware**: logging, CORS, rate limiting and auth
//! - **handlers / health / websocket**: the HTTP surface
//! - **dictation**: optional local microphone mode

mod audio;
mod auth;
mod config;
mod correction;
mod dictation;
mod error;
mod handlers;
mod health;
mod middleware;
mod recognition;
mod state;
mod streaming;
mod websocket;

use crate::audio::{CaptureParams, CaptureSession, VadConfig};
use crate::auth::ApiToken;
use crate::config::AppConfig;
use crate::correction::{Corrector, OllamaCorrector};
use crate::dictation::{DictatedText, Dictation};
use crate::middleware::{BearerAuth, LoopbackCors, RateLimit, RateLimiter, RequestLogging};
use crate::recognition::{RecognizerFactory, UtteranceRecognizerFactory, WhisperClient};
use crate::state::AppState;
use crate::streaming::CancelScope;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const STARTUP_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Application entry point.
///
/// ## Startup Sequence:
/// 1. Load `.env` and initialize tracing
/// 2. Load and validate configuration
/// 3. Resolve the API token (generated on first run)
/// 4. Build the recognizer factory and the optional corrector
/// 5. Start the rate-limit sweeper, signal handlers and optional dictation
/// 6. Serve until the root scope is cancelled, then drain within the grace period
///
/// ## Rust Concepts:
/// - **#[actix_web::main]**: starts the actix system (a tokio runtime) before `main` runs
/// - **anyhow::Result**: any startup failure aborts with its context chain
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting dictate-daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let token = ApiToken::resolve(&config.auth).context("failed to set up the API token")?;
    info!(token_prefix = token.prefix(), "API token ready");

    let recognizers = build_recognizers(&config)?;
    info!(backend = %recognizers.describe(), "Transcription backend configured");
    let corrector = build_corrector(&config).await;

    let app_state = AppState::new(config.clone(), token.clone(), recognizers, corrector);
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.max_requests,
        config.rate_limit_window(),
    ));
    Arc::clone(&limiter).spawn_sweeper();

    setup_signal_handlers(app_state.root_scope.clone());
    let dictation_task = start_dictation(&app_state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting HTTP server on {}", bind_addr);

    let state_data = web::Data::new(app_state.clone());
    let server = HttpServer::new(move || {
        App::new()
            .app_data(state_data.clone())
            .app_data(handlers::json_config())
            // last wrap runs first
            .wrap(RateLimit::new(Arc::clone(&limiter)))
            .wrap(LoopbackCors)
            .wrap(RequestLogging)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .service(
                        web::resource("/transcribe")
                            .wrap(BearerAuth::new(token.clone()))
                            .route(web::post().to(handlers::transcribe)),
                    )
                    .service(
                        web::resource("/correct")
                            .wrap(BearerAuth::new(token.clone()))
                            .route(web::post().to(handlers::correct)),
                    )
                    .service(
                        web::resource("/stream")
                            .wrap(BearerAuth::new(token.clone()))
                            .route(web::get().to(websocket::stream)),
                    ),
            )
    })
    .shutdown_timeout(config.server.shutdown_grace_secs)
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {}", bind_addr))?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);
    let shutdown = app_state.root_scope.cancelled();

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = shutdown => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    app_state.root_scope.cancel();
    if let Some(task) = dictation_task {
        let grace = Duration::from_secs(config.server.shutdown_grace_secs);
        if tokio::time::timeout(grace, task).await.is_err() {
            warn!("Dictation did not stop within the grace period");
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` wins; otherwise debug for this crate and info for actix.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dictate_daemon=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Whisper HTTP client wrapped in the VAD-gated utterance recognizer.
fn build_recognizers(config: &AppConfig) -> Result<Arc<dyn RecognizerFactory>> {
    let whisper = WhisperClient::new(&config.recognition)
        .context("failed to create the transcription client")?;
    let factory = UtteranceRecognizerFactory::new(
        Arc::new(whisper),
        VadConfig::from_settings(&config.vad, config.recognition.sample_rate),
        config.recognition.language.clone(),
        config.recognition.max_utterance_secs,
    );
    Ok(Arc::new(factory))
}

/// `None` when correction is disabled. A backend that is down at startup is
/// only a warning: it may come up later, and `/health` reports its state.
async fn build_corrector(config: &AppConfig) -> Option<Arc<dyn Corrector>> {
    if !config.correction.enabled {
        info!("Text correction disabled");
        return None;
    }

    let corrector = match OllamaCorrector::new(&config.correction) {
        Ok(corrector) => corrector,
        Err(err) => {
            warn!(error = %err, "Failed to create correction client, running without correction");
            return None;
        }
    };

    match tokio::time::timeout(STARTUP_HEALTH_TIMEOUT, corrector.health_check()).await {
        Ok(Ok(())) => info!(model = %config.correction.model, "Correction engine ready"),
        Ok(Err(err)) => warn!(error = %err, "Correction backend health check failed"),
        Err(_) => warn!("Correction backend did not answer the health check in time"),
    }
    Some(Arc::new(corrector))
}

/// Spawn local microphone dictation if it is enabled and this build can capture.
fn start_dictation(state: &AppState) -> Option<tokio::task::JoinHandle<()>> {
    let config = &state.config;
    if !config.capture.enabled {
        return None;
    }

    let params = CaptureParams {
        sample_rate: config.recognition.sample_rate,
        channels: config.capture.channels,
        frame_size: config.capture.frame_size,
        queue_chunks: config.capture.queue_chunks,
    };
    let Some(driver) = dictation::platform_driver(config.capture.device.clone(), params.clone())
    else {
        warn!("Capture is enabled but this build has no audio driver (build with --features cpal-audio)");
        return None;
    };

    let recognizer = match state.recognizers.create("") {
        Ok(recognizer) => recognizer,
        Err(err) => {
            warn!(error = %err, "Failed to create recognizer for dictation");
            return None;
        }
    };
    let corrector = if config.capture.correct {
        state.corrector.clone()
    } else {
        None
    };

    let dictation = Dictation::new(
        CaptureSession::new(driver, params),
        recognizer,
        corrector,
        config.stream_correction_timeout(),
        state.root_scope.child(),
    );

    let (tx, mut rx) = mpsc::channel::<DictatedText>(32);
    tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            println!("> {}", text.best());
        }
    });

    Some(tokio::spawn(async move {
        if let Err(err) = dictation.run(tx).await {
            error!(error = %err, "Dictation failed");
        }
    }))
}

/// Cancel `root` on SIGTERM or SIGINT (Ctrl+C elsewhere).
fn setup_signal_handlers(root: CancelScope) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let (mut sigterm, mut sigint) =
                match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                    (Ok(term), Ok(int)) => (term, int),
                    (Err(err), _) | (_, Err(err)) => {
                        error!(error = %err, "Failed to install signal handlers");
                        return;
                    }
                };

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "Failed to listen for Ctrl+C");
                return;
            }
            info!("Received Ctrl+C");
        }

        root.cancel();
    });
}
