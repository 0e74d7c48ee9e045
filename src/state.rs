//! # Application State
//!
//! Everything a request handler or WebSocket session needs, shared through
//! `web::Data<AppState>`. Cloning is cheap: every field is an `Arc` or small.
//!
//! ## Key Rust Concepts:
//!
//! ### `Arc<dyn Trait>`
//! - **Purpose**: shared ownership of a value known only by its trait
//! - **Here**: handlers reach the recognizer factory and the corrector through
//!   their traits, so tests can swap in scripted fakes
//! - **Bounds**: both traits are `Send + Sync`, so the `Arc` can cross actix
//!   worker threads
//!
//! ### `Arc<RwLock<T>>`
//! - **Arc**: every handler clone points at the same counters
//! - **RwLock**: many readers (`/health`) or one writer (a finishing request)
//! - **Poisoning**: a lock poisoned by a panicking thread is recovered with
//!   `into_inner`; the counters are plain integers and stay usable

use crate::auth::ApiToken;
use crate::config::AppConfig;
use crate::correction::Corrector;
use crate::recognition::RecognizerFactory;
use crate::streaming::{CancelScope, SessionDeps};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// Shared state handed to every handler and WebSocket actor.
///
/// ## Rust Concepts:
/// - **#[derive(Clone)]**: cloning copies the `Arc`s, not the data behind them
/// - **No `Debug`**: trait objects (`dyn RecognizerFactory`) carry no `Debug` impl
#[derive(Clone)]
pub struct AppState {
    /// Configuration loaded at startup. Read-only for the life of the process
    pub config: Arc<AppConfig>,

    /// Request and session counters, updated by middleware and the stream actor
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started; `Instant` is `Copy`, so no lock is needed
    pub start_time: Instant,

    /// The bearer secret protected endpoints compare against
    pub token: ApiToken,

    /// Builds one recognizer per stream or REST request
    pub recognizers: Arc<dyn RecognizerFactory>,

    /// `None` when correction is disabled in the configuration
    pub corrector: Option<Arc<dyn Corrector>>,

    /// Cancelled on shutdown; every streaming session and `/correct` call
    /// runs under a child of it
    pub root_scope: CancelScope,
}

/// Counters since server start.
///
/// ## Fields:
/// - **request_count**: every HTTP request, including rejected ones
/// - **error_count**: requests answered with a 4xx or 5xx status
/// - **active_sessions**: open `/stream` connections right now
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AppMetrics {
    /// Total HTTP requests seen since start
    pub request_count: u64,

    /// Requests that ended with status >= 400
    pub error_count: u64,

    /// Open `/stream` connections
    pub active_sessions: u32,
}

impl AppState {
    /// Build the state from already-constructed collaborators.
    ///
    /// The root cancel scope is created here, so every clone of the state
    /// shares the same shutdown signal.
    pub fn new(
        config: AppConfig,
        token: ApiToken,
        recognizers: Arc<dyn RecognizerFactory>,
        corrector: Option<Arc<dyn Corrector>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            token,
            recognizers,
            corrector,
            root_scope: CancelScope::root(),
        }
    }

    /// Collaborators for one new streaming session.
    pub fn session_deps(&self) -> SessionDeps {
        SessionDeps {
            recognizers: Arc::clone(&self.recognizers),
            corrector: self.corrector.clone(),
            correction_timeout: self.config.stream_correction_timeout(),
        }
    }

    fn metrics_mut(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics_ref(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Called by the logging middleware for every request.
    pub fn record_request(&self, is_error: bool) {
        let mut metrics = self.metrics_mut();
        metrics.request_count += 1;
        if is_error {
            metrics.error_count += 1;
        }
    }

    /// A `/stream` connection opened.
    pub fn increment_active_sessions(&self) {
        self.metrics_mut().active_sessions += 1;
    }

    /// A `/stream` connection closed. Saturates at zero.
    pub fn decrement_active_sessions(&self) {
        let mut metrics = self.metrics_mut();
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
    }

    /// Copy of the counters; the lock is released before returning.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_ref().clone()
    }

    /// Whole seconds since [`AppState::new`].
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::streaming::session::tests::ScriptedFactory;

    /// State wired to scripted collaborators and the token "test-token".
    pub(crate) fn test_state(corrector: Option<Arc<dyn Corrector>>) -> AppState {
        AppState::new(
            AppConfig::default(),
            ApiToken::new("test-token"),
            Arc::new(ScriptedFactory::default()),
            corrector,
        )
    }

    #[test]
    fn test_counters() {
        let state = test_state(None);
        state.record_request(false);
        state.record_request(true);
        state.increment_active_sessions();
        state.increment_active_sessions();
        state.decrement_active_sessions();

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 2);
        assert_eq!(metrics.error_count, 1);
        assert_eq!(metrics.active_sessions, 1);
    }

    #[test]
    fn test_active_sessions_never_underflow() {
        let state = test_state(None);
        state.decrement_active_sessions();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }

    #[test]
    fn test_clones_share_counters() {
        let state = test_state(None);
        let clone = state.clone();
        clone.record_request(false);
        assert_eq!(state.get_metrics_snapshot().request_count, 1);
    }
}
