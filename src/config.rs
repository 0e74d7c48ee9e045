//! # Configuration Management
//!
//! Loads the daemon configuration from, lowest to highest priority:
//! 1. Built-in defaults (the `Default` impls below)
//! 2. An optional `config.toml` in the working directory
//! 3. Environment variables prefixed with `DICTATE_`, nested with `__`
//!    (e.g. `DICTATE_CORRECTION__ENABLED=true`)
//! 4. The bare `HOST` / `PORT` variables used by process supervisors
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: every section derives `Serialize` so the defaults can be fed
//!   back into the `config` crate as the bottom layer
//! - **`#[serde(default)]`**: a partial TOML file only overrides what it names

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Full daemon configuration, one field per TOML section.
///
/// ## Rust Concepts:
/// - **#[derive(Serialize, Deserialize)]**: the same struct is read from TOML
///   and written back out as the defaults layer
/// - **#[serde(default)]**: a missing section falls back to its `Default`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// `[server]`: listener address and shutdown grace
    pub server: ServerConfig,

    /// `[auth]`: where the bearer token comes from
    pub auth: AuthConfig,

    /// `[recognition]`: Whisper backend and audio format
    pub recognition: RecognitionConfig,

    /// `[vad]`: voice activity detector tuning
    pub vad: VadSettings,

    /// `[correction]`: optional Ollama post-processing
    pub correction: CorrectionConfig,

    /// `[rate_limit]`: per-IP request budget
    pub rate_limit: RateLimitConfig,

    /// `[streaming]`: WebSocket session timing
    pub streaming: StreamingConfig,

    /// `[capture]`: local microphone dictation
    pub capture: CaptureConfig,
}

/// Listener settings.
///
/// ## Fields:
/// - `host`: loopback by default; the daemon is meant for local editors only
/// - `port`: TCP port (8765 by default)
/// - `shutdown_grace_secs`: how long in-flight requests get after SIGINT/SIGTERM
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind, `127.0.0.1` by default
    pub host: String,

    /// TCP port to listen on
    pub port: u16,

    /// Seconds in-flight work gets after a shutdown signal
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            shutdown_grace_secs: 10,
        }
    }
}

/// Where the bearer token lives.
///
/// `token` pins the secret explicitly (useful for tests and containers);
/// otherwise the token is read from `token_path`, or from
/// `~/.dictate2me/api-token` when no path is given, and generated on first run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Explicit secret; wins over any token file
    pub token: Option<String>,

    /// Token file location; `~/.dictate2me/api-token` when unset
    pub token_path: Option<String>,
}

/// Speech recognition backend (a Whisper-compatible HTTP server).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Base URL, `/v1/audio/transcriptions` is appended
    pub backend_url: String,

    /// Model name sent with every upload
    pub model: String,

    /// Default language when a client does not send one
    pub language: String,

    /// The only sample rate the pipeline accepts
    pub sample_rate: u32,

    /// Upper bound on a single utterance; longer speech is flushed early
    pub max_utterance_secs: u32,

    /// Bound on one HTTP call to the backend
    pub request_timeout_secs: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8080".to_string(),
            model: "whisper-1".to_string(),
            language: "en".to_string(),
            sample_rate: 16000,
            max_utterance_secs: 30,
            request_timeout_secs: 60,
        }
    }
}

/// Voice activity detector tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadSettings {
    /// RMS energy above which a chunk counts as speech
    pub energy_threshold: f64,

    /// Continuous speech needed before the detector reports speech
    pub min_speech_ms: u64,

    /// Continuous silence needed before it reports silence again
    pub min_silence_ms: u64,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            energy_threshold: 500.0,
            min_speech_ms: 100,
            min_silence_ms: 500,
        }
    }
}

/// Optional LLM text correction through Ollama.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    /// Off by default; `/correct` answers 503 while disabled
    pub enabled: bool,

    /// Ollama base URL
    pub ollama_url: String,

    /// Ollama model tag, e.g. `gemma2:2b`
    pub model: String,

    /// Bound on one HTTP call to Ollama
    pub timeout_secs: u64,

    /// Sampling temperature; low keeps the output close to the input
    pub temperature: f32,

    /// Instructions sent as the `system` field of every generate call
    pub system_prompt: String,
}

/// Prompt used when the configuration does not set one.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a proofreader for dictated text.
Fix the text you are given by adding:
- proper punctuation (commas, periods, question marks)
- correct capitalization (sentence starts, proper nouns)
- the minimal grammar fixes needed
- paragraph breaks where appropriate

Keep the original content and meaning. Do not rewrite or rephrase.
Return ONLY the corrected text, without explanations or comments.";

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ollama_url: "http://localhost:11434".to_string(),
            model: "gemma2:2b".to_string(),
            timeout_secs: 30,
            temperature: 0.1,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Fixed-window limiter settings, applied per client IP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests accepted per client per window
    pub max_requests: u32,

    /// Window length in seconds; also the sweep interval
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_secs: 60,
        }
    }
}

/// WebSocket session timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Silence from the client longer than this tears the session down
    pub read_timeout_secs: u64,

    /// Bound on each correction call made on behalf of a session
    pub correction_timeout_secs: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: 60,
            correction_timeout_secs: 30,
        }
    }
}

/// Local microphone dictation (needs the `cpal-audio` feature).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Start dictation next to the server
    pub enabled: bool,

    /// Input device name; the host default when unset
    pub device: Option<String>,

    /// Channels requested from the device; downmixed to mono
    pub channels: u16,

    /// Samples per callback chunk
    pub frame_size: u32,

    /// Bounded queue between the driver thread and the consumer, in chunks
    pub queue_chunks: usize,

    /// Run finished utterances through the corrector before logging them
    pub correct: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device: None,
            channels: 1,
            frame_size: 1024,
            queue_chunks: 100,
            correct: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from `config.toml` (if present) and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from("config")
    }

    /// Same as [`AppConfig::load`] with an explicit file stem. The extension
    /// is discovered by the `config` crate (`.toml`, `.json`, ...).
    pub fn load_from(file_stem: &str) -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name(file_stem).required(false))
            .add_source(
                config::Environment::with_prefix("DICTATE")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings
            .build()
            .context("failed to assemble configuration sources")?
            .try_deserialize()
            .context("failed to parse configuration")?;
        Ok(config)
    }

    /// Reject values the daemon cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }
        if self.recognition.sample_rate == 0 {
            return Err(anyhow::anyhow!("Recognition sample rate must be greater than 0"));
        }
        if self.recognition.max_utterance_secs == 0 {
            return Err(anyhow::anyhow!("Max utterance length must be greater than 0"));
        }
        if self.vad.energy_threshold < 0.0 {
            return Err(anyhow::anyhow!("VAD energy threshold cannot be negative"));
        }
        if self.rate_limit.max_requests == 0 || self.rate_limit.window_secs == 0 {
            return Err(anyhow::anyhow!("Rate limit cap and window must be greater than 0"));
        }
        if self.streaming.read_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Stream read timeout must be greater than 0"));
        }
        if self.correction.timeout_secs == 0 || self.streaming.correction_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Correction timeouts must be greater than 0"));
        }
        if self.capture.frame_size == 0 || self.capture.queue_chunks == 0 {
            return Err(anyhow::anyhow!("Capture frame size and queue depth must be greater than 0"));
        }
        if self.capture.channels == 0 {
            return Err(anyhow::anyhow!("Capture needs at least one channel"));
        }
        Ok(())
    }

    /// `streaming.read_timeout_secs` as a `Duration`.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.streaming.read_timeout_secs)
    }

    /// Per-call correction bound for streaming sessions and dictation.
    pub fn stream_correction_timeout(&self) -> Duration {
        Duration::from_secs(self.streaming.correction_timeout_secs)
    }

    /// `rate_limit.window_secs` as a `Duration`.
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit.window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8765);
        assert_eq!(config.recognition.sample_rate, 16000);
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.streaming.read_timeout_secs, 60);
        assert!(!config.correction.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rate_limit.window_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.capture.queue_chunks = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.toml");
        std::fs::write(
            &path,
            "[correction]\nenabled = true\nmodel = \"llama3.2:1b\"\n\n[rate_limit]\nmax_requests = 5\n",
        )
        .unwrap();

        let stem = dir.path().join("daemon");
        let config = AppConfig::load_from(stem.to_str().unwrap()).unwrap();
        assert!(config.correction.enabled);
        assert_eq!(config.correction.model, "llama3.2:1b");
        assert_eq!(config.rate_limit.max_requests, 5);
        // untouched sections keep their defaults
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.correction.ollama_url, "http://localhost:11434");
    }
}
