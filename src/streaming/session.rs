//! # Streaming Session State Machine
//!
//! One [`StreamingSession`] per WebSocket connection. The transport feeds it
//! text frames strictly in arrival order and writes back whatever
//! [`Outbound`] items it returns.
//!
//! ## States:
//! ```text
//!            start               stop
//!   Idle ──────────────▶ Started ─────────▶ Stopped (terminal)
//!    │                   │  ▲ audio
//!    │                   └──┘
//!    └───────────────── stop ─────────────▶ Stopped
//! ```
//!
//! Invalid events never change state: they produce an `error` frame and the
//! session stays usable. Only `stop` (or the transport going away) ends it.
//!
//! ## Concurrency:
//! Each session owns its recognizer and a child [`CancelScope`] of the
//! server's root scope. Correction calls run in a grandchild scope with a
//! time limit; on failure, timeout or cancellation the raw text is used.

use super::protocol::{ClientMessage, Outbound, ProtocolError, ServerMessage, StartConfig};
use super::scope::CancelScope;
use crate::audio::pcm::decode_base64_payload;
use crate::correction::{CorrectionError, Corrector};
use crate::recognition::{Recognizer, RecognizerFactory, Segment};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Started(StartConfig),
    Stopped,
}

/// Protocol events that can move the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Start(StartConfig),
    Audio,
    Stop,
}

impl SessionState {
    /// The transition table. `Err` means "reject, keep the current state".
    pub fn next(&self, event: &SessionEvent) -> Result<SessionState, ProtocolError> {
        use SessionEvent as E;
        use SessionState as S;

        match (self, event) {
            (S::Stopped, _) => Err(ProtocolError::SessionClosed),
            (S::Idle, E::Start(config)) => Ok(S::Started(config.clone())),
            (S::Started(_), E::Start(_)) => Err(ProtocolError::AlreadyStarted),
            (S::Idle, E::Audio) => Err(ProtocolError::NotStarted),
            (S::Started(config), E::Audio) => Ok(S::Started(config.clone())),
            (S::Idle, E::Stop) | (S::Started(_), E::Stop) => Ok(S::Stopped),
        }
    }
}

/// Shared collaborators every session is built from.
#[derive(Clone)]
pub struct SessionDeps {
    pub recognizers: Arc<dyn RecognizerFactory>,
    pub corrector: Option<Arc<dyn Corrector>>,
    pub correction_timeout: Duration,
}

pub struct StreamingSession {
    id: String,
    state: SessionState,
    recognizer: Option<Box<dyn Recognizer>>,
    deps: SessionDeps,
    scope: CancelScope,
}

impl StreamingSession {
    pub fn new(id: impl Into<String>, deps: SessionDeps, parent: &CancelScope) -> Self {
        Self {
            id: id.into(),
            state: SessionState::Idle,
            recognizer: None,
            deps,
            scope: parent.child(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The session's own scope; cancelled when the session ends.
    pub fn scope(&self) -> &CancelScope {
        &self.scope
    }

    pub fn is_stopped(&self) -> bool {
        self.state == SessionState::Stopped
    }

    /// Process one inbound text frame.
    pub async fn handle_text(&mut self, text: &str) -> Vec<Outbound> {
        if self.is_stopped() {
            return vec![error_frame(&ProtocolError::SessionClosed)];
        }

        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                debug!(session_id = %self.id, error = %err, "Rejected client frame");
                return vec![error_frame(&err)];
            }
        };

        match message {
            ClientMessage::Start(config) => match self.start(config).await {
                Ok(()) => Vec::new(),
                Err(err) => vec![error_frame(&err)],
            },
            ClientMessage::Audio(payload) => match self.audio(&payload).await {
                Ok(frames) => frames.into_iter().map(Outbound::Frame).collect(),
                Err(err) => vec![error_frame(&err)],
            },
            ClientMessage::Stop => self.stop().await,
        }
    }

    pub async fn start(&mut self, config: StartConfig) -> Result<(), ProtocolError> {
        let next = self.state.next(&SessionEvent::Start(config.clone()))?;

        let mut recognizer = self
            .deps
            .recognizers
            .create(&config.language)
            .map_err(|e| ProtocolError::Recognition(e.to_string()))?;
        recognizer
            .reset_state()
            .await
            .map_err(|e| ProtocolError::Recognition(e.to_string()))?;

        info!(
            session_id = %self.id,
            language = %config.language,
            correction = config.enable_correction,
            "Stream started"
        );
        self.recognizer = Some(recognizer);
        self.state = next;
        Ok(())
    }

    /// Feed one base64 audio payload. Returns finals (in order) then a partial.
    pub async fn audio(&mut self, payload: &str) -> Result<Vec<ServerMessage>, ProtocolError> {
        self.state.next(&SessionEvent::Audio)?;
        let config = self.start_config();

        let decoded = decode_base64_payload(payload)?;
        let recognizer = self.recognizer.as_mut().ok_or(ProtocolError::NotStarted)?;
        let segments = recognizer
            .accept_audio(&decoded.samples)
            .await
            .map_err(|e| ProtocolError::Recognition(e.to_string()))?;

        let mut frames = Vec::with_capacity(segments.len() + 1);
        for segment in segments.into_iter().filter(|s| !s.is_empty()) {
            frames.push(self.finalize(segment, config.enable_correction).await);
        }

        if let Some(recognizer) = self.recognizer.as_mut() {
            match recognizer.partial_result().await {
                Ok(text) if !text.is_empty() => frames.push(ServerMessage::Partial { text }),
                Ok(_) => {}
                Err(err) => debug!(session_id = %self.id, error = %err, "Partial result unavailable"),
            }
        }
        Ok(frames)
    }

    /// Flush the last result, then close. Terminal.
    pub async fn stop(&mut self) -> Vec<Outbound> {
        if let Err(err) = self.state.next(&SessionEvent::Stop) {
            return vec![error_frame(&err)];
        }
        let config = self.start_config();

        let mut out = Vec::new();
        if let Some(recognizer) = self.recognizer.as_mut() {
            match recognizer.final_result().await {
                Ok(segment) if !segment.is_empty() => {
                    let frame = self.finalize(segment, config.enable_correction).await;
                    out.push(Outbound::Frame(frame));
                }
                Ok(_) => {}
                Err(err) => warn!(session_id = %self.id, error = %err, "Final result failed"),
            }
        }
        out.push(Outbound::Close);

        info!(session_id = %self.id, "Stream stopped");
        self.shutdown().await;
        out
    }

    /// Tear down without flushing (transport failure, server shutdown).
    /// Safe to call more than once.
    pub async fn shutdown(&mut self) {
        self.state = SessionState::Stopped;
        self.scope.cancel();
        if let Some(mut recognizer) = self.recognizer.take() {
            if let Err(err) = recognizer.close().await {
                warn!(session_id = %self.id, error = %err, "Failed to close recognizer");
            }
        }
    }

    fn start_config(&self) -> StartConfig {
        match &self.state {
            SessionState::Started(config) => config.clone(),
            _ => StartConfig::default(),
        }
    }

    /// `corrected` mirrors the transcript unless correction ran and succeeded.
    async fn finalize(&self, segment: Segment, correct: bool) -> ServerMessage {
        let corrected = if correct {
            self.correct(&segment.text).await
        } else {
            segment.text.clone()
        };
        ServerMessage::Final {
            transcript: segment.text,
            corrected,
            confidence: segment.confidence,
        }
    }

    /// Corrected text, or the input unchanged if correction is unavailable.
    async fn correct(&self, text: &str) -> String {
        let Some(corrector) = self.deps.corrector.as_ref() else {
            return text.to_string();
        };

        let result = self
            .scope
            .child()
            .run(self.deps.correction_timeout, corrector.correct(text))
            .await
            .map_err(CorrectionError::from)
            .and_then(|corrected| corrected);
        match result {
            Ok(corrected) if !corrected.is_empty() => corrected,
            Ok(_) => text.to_string(),
            Err(err) => {
                warn!(session_id = %self.id, error = %err, "Correction failed, using raw text");
                text.to_string()
            }
        }
    }
}

fn error_frame(err: &ProtocolError) -> Outbound {
    Outbound::Frame(ServerMessage::error(err))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::recognition::RecognitionError;
    use async_trait::async_trait;
    use base64::{engine::general_purpose, Engine as _};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Emits one final segment per audio frame whose first sample is positive,
    /// and echoes the sample count as the partial.
    pub(crate) struct ScriptedRecognizer {
        pending: usize,
        last_partial: String,
        closed: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Recognizer for ScriptedRecognizer {
        async fn reset_state(&mut self) -> Result<(), RecognitionError> {
            self.log.lock().unwrap().push("reset".to_string());
            self.pending = 0;
            Ok(())
        }

        async fn accept_audio(&mut self, samples: &[i16]) -> Result<Vec<Segment>, RecognitionError> {
            if self.closed {
                return Err(RecognitionError::Closed);
            }
            self.pending += samples.len();
            self.last_partial = format!("{} samples", self.pending);
            if samples[0] > 0 {
                self.pending = 0;
                return Ok(vec![Segment {
                    text: format!("segment {}", samples[0]),
                    start: 0.0,
                    end: 1.0,
                    confidence: 0.8,
                }]);
            }
            Ok(Vec::new())
        }

        async fn partial_result(&mut self) -> Result<String, RecognitionError> {
            Ok(if self.pending > 0 { self.last_partial.clone() } else { String::new() })
        }

        async fn final_result(&mut self) -> Result<Segment, RecognitionError> {
            if self.pending == 0 {
                return Ok(Segment::default());
            }
            Ok(Segment {
                text: "tail".to_string(),
                start: 1.0,
                end: 2.0,
                confidence: 0.6,
            })
        }

        async fn close(&mut self) -> Result<(), RecognitionError> {
            self.closed = true;
            self.log.lock().unwrap().push("close".to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct ScriptedFactory {
        pub created: AtomicUsize,
        pub log: Arc<Mutex<Vec<String>>>,
    }

    impl RecognizerFactory for ScriptedFactory {
        fn create(&self, language: &str) -> Result<Box<dyn Recognizer>, RecognitionError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push(format!("create {}", language));
            Ok(Box::new(ScriptedRecognizer {
                pending: 0,
                last_partial: String::new(),
                closed: false,
                log: Arc::clone(&self.log),
            }))
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    pub(crate) enum CorrectorMode {
        Uppercase,
        Fail,
        Hang,
    }

    pub(crate) struct ScriptedCorrector(pub CorrectorMode);

    #[async_trait]
    impl Corrector for ScriptedCorrector {
        async fn correct(&self, text: &str) -> Result<String, CorrectionError> {
            match self.0 {
                CorrectorMode::Uppercase => Ok(text.to_uppercase()),
                CorrectorMode::Fail => Err(CorrectionError::Incomplete),
                CorrectorMode::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(String::new())
                }
            }
        }

        async fn health_check(&self) -> Result<(), CorrectionError> {
            Ok(())
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    pub(crate) fn audio_frame(samples: &[i16]) -> String {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        format!(
            r#"{{"type":"audio","data":{{"data":"{}"}}}}"#,
            general_purpose::STANDARD.encode(bytes)
        )
    }

    fn session(corrector: Option<CorrectorMode>) -> (StreamingSession, Arc<ScriptedFactory>) {
        let factory = Arc::new(ScriptedFactory::default());
        let deps = SessionDeps {
            recognizers: factory.clone(),
            corrector: corrector
                .map(|mode| Arc::new(ScriptedCorrector(mode)) as Arc<dyn Corrector>),
            correction_timeout: Duration::from_millis(50),
        };
        (StreamingSession::new("test", deps, &CancelScope::root()), factory)
    }

    fn frame(message: ServerMessage) -> Outbound {
        Outbound::Frame(message)
    }

    fn error(message: &str) -> Outbound {
        frame(ServerMessage::Error {
            message: message.to_string(),
        })
    }

    #[test]
    fn test_transition_table() {
        let config = StartConfig::default();
        let started = SessionState::Started(config.clone());

        assert_eq!(
            SessionState::Idle.next(&SessionEvent::Start(config.clone())),
            Ok(started.clone())
        );
        assert_eq!(
            started.next(&SessionEvent::Start(config.clone())),
            Err(ProtocolError::AlreadyStarted)
        );
        assert_eq!(
            SessionState::Idle.next(&SessionEvent::Audio),
            Err(ProtocolError::NotStarted)
        );
        assert_eq!(started.next(&SessionEvent::Audio), Ok(started.clone()));
        assert_eq!(SessionState::Idle.next(&SessionEvent::Stop), Ok(SessionState::Stopped));
        assert_eq!(started.next(&SessionEvent::Stop), Ok(SessionState::Stopped));
        for event in [SessionEvent::Start(config), SessionEvent::Audio, SessionEvent::Stop] {
            assert_eq!(
                SessionState::Stopped.next(&event),
                Err(ProtocolError::SessionClosed)
            );
        }
    }

    #[tokio::test]
    async fn test_audio_before_start_is_rejected_without_auto_start() {
        let (mut session, factory) = session(None);

        let out = session.handle_text(&audio_frame(&[5, 5])).await;
        assert_eq!(out, vec![error("stream not started")]);
        assert_eq!(session.state(), &SessionState::Idle);
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);

        // the session is still usable
        assert!(session.handle_text(r#"{"type":"start"}"#).await.is_empty());
        assert!(matches!(session.state(), SessionState::Started(_)));
    }

    #[tokio::test]
    async fn test_start_creates_and_resets_recognizer() {
        let (mut session, factory) = session(None);
        let out = session
            .handle_text(r#"{"type":"start","data":{"language":"pt"}}"#)
            .await;
        assert!(out.is_empty());
        assert_eq!(*factory.log.lock().unwrap(), vec!["create pt", "reset"]);

        let out = session.handle_text(r#"{"type":"start"}"#).await;
        assert_eq!(out, vec![error("stream already started")]);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_finals_then_partial() {
        let (mut session, _) = session(None);
        session.handle_text(r#"{"type":"start"}"#).await;

        let out = session.handle_text(&audio_frame(&[0, 0, 0])).await;
        assert_eq!(out, vec![frame(ServerMessage::Partial { text: "3 samples".to_string() })]);

        let out = session.handle_text(&audio_frame(&[7, 0])).await;
        assert_eq!(
            out,
            vec![frame(ServerMessage::Final {
                transcript: "segment 7".to_string(),
                corrected: "segment 7".to_string(),
                confidence: 0.8,
            })]
        );
    }

    #[tokio::test]
    async fn test_bad_audio_payloads_keep_session_open() {
        let (mut session, _) = session(None);
        session.handle_text(r#"{"type":"start"}"#).await;

        let out = session
            .handle_text(r#"{"type":"audio","data":{"data":"%%%"}}"#)
            .await;
        assert_eq!(out, vec![error("invalid base64 audio")]);

        // three bytes cannot be 16-bit samples
        let out = session
            .handle_text(r#"{"type":"audio","data":{"data":"AAAA"}}"#)
            .await;
        assert!(matches!(
            &out[..],
            [Outbound::Frame(ServerMessage::Error { message })] if message.contains("even")
        ));

        let out = session.handle_text(r#"{"type":"rewind"}"#).await;
        assert_eq!(out, vec![error("unknown message type: rewind")]);
        assert!(matches!(session.state(), SessionState::Started(_)));
    }

    #[tokio::test]
    async fn test_stop_flushes_final_then_closes() {
        let (mut session, factory) = session(None);
        session.handle_text(r#"{"type":"start"}"#).await;
        session.handle_text(&audio_frame(&[0, 0])).await;

        let out = session.handle_text(r#"{"type":"stop"}"#).await;
        assert_eq!(
            out,
            vec![
                frame(ServerMessage::Final {
                    transcript: "tail".to_string(),
                    corrected: "tail".to_string(),
                    confidence: 0.6,
                }),
                Outbound::Close,
            ]
        );
        assert!(session.is_stopped());
        assert!(session.scope().is_cancelled());
        assert_eq!(factory.log.lock().unwrap().last().unwrap(), "close");

        let out = session.handle_text(&audio_frame(&[1])).await;
        assert_eq!(out, vec![error("session closed")]);
    }

    #[tokio::test]
    async fn test_stop_without_pending_text_only_closes() {
        let (mut session, _) = session(None);
        let out = session.handle_text(r#"{"type":"stop"}"#).await;
        assert_eq!(out, vec![Outbound::Close]);
        assert!(session.is_stopped());
    }

    #[tokio::test]
    async fn test_correction_applied_when_requested() {
        let (mut session, _) = session(Some(CorrectorMode::Uppercase));
        session
            .handle_text(r#"{"type":"start","data":{"enableCorrection":true}}"#)
            .await;

        let out = session.handle_text(&audio_frame(&[3])).await;
        assert_eq!(
            out,
            vec![frame(ServerMessage::Final {
                transcript: "segment 3".to_string(),
                corrected: "SEGMENT 3".to_string(),
                confidence: 0.8,
            })]
        );
    }

    #[tokio::test]
    async fn test_correction_failure_and_timeout_fall_back_to_raw_text() {
        for mode in [CorrectorMode::Fail, CorrectorMode::Hang] {
            let (mut session, _) = session(Some(mode));
            session
                .handle_text(r#"{"type":"start","data":{"enableCorrection":true}}"#)
                .await;

            let out = session.handle_text(&audio_frame(&[4])).await;
            assert_eq!(
                out,
                vec![frame(ServerMessage::Final {
                    transcript: "segment 4".to_string(),
                    corrected: "segment 4".to_string(),
                    confidence: 0.8,
                })]
            );
            assert!(matches!(session.state(), SessionState::Started(_)));
        }
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let root = CancelScope::root();
        let factory = Arc::new(ScriptedFactory::default());
        let deps = SessionDeps {
            recognizers: factory.clone(),
            corrector: None,
            correction_timeout: Duration::from_secs(1),
        };
        let mut a = StreamingSession::new("a", deps.clone(), &root);
        let mut b = StreamingSession::new("b", deps, &root);

        a.handle_text(r#"{"type":"start"}"#).await;
        b.handle_text(r#"{"type":"start"}"#).await;
        a.handle_text(r#"{"type":"stop"}"#).await;

        assert!(a.scope().is_cancelled());
        assert!(!b.scope().is_cancelled());
        let out = b.handle_text(&audio_frame(&[0])).await;
        assert_eq!(out, vec![frame(ServerMessage::Partial { text: "1 samples".to_string() })]);
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);

        // server shutdown reaches every session
        root.cancel();
        assert!(b.scope().is_cancelled());
    }
}
