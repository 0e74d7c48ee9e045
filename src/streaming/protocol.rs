//! Wire format of the `/stream` WebSocket.
//!
//! Every frame is a JSON envelope `{"type": ..., "data": ...}`.
//!
//! Client → server: `start {language, enableCorrection}`, `audio {data: <base64 PCM>}`, `stop`.
//! Server → client: `partial {text}`, `final {transcript, corrected, confidence}`, `error {message}`.
//! `corrected` always equals `transcript` unless a correction actually ran.

use crate::audio::pcm::PcmError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Options sent with `start`. A missing or `null` body means defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConfig {
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub enable_correction: bool,
}

#[derive(Debug, Deserialize)]
struct AudioData {
    data: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Start(StartConfig),
    /// Still base64; decoded only once the session is known to be started
    Audio(String),
    Stop,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| ProtocolError::InvalidMessage(e.to_string()))?;

        match envelope.kind.as_str() {
            "start" => {
                let config = if envelope.data.is_null() {
                    StartConfig::default()
                } else {
                    serde_json::from_value(envelope.data)
                        .map_err(|e| ProtocolError::InvalidStartConfig(e.to_string()))?
                };
                Ok(ClientMessage::Start(config))
            }
            "audio" => {
                let audio: AudioData = serde_json::from_value(envelope.data)
                    .map_err(|_| ProtocolError::InvalidAudioMessage)?;
                Ok(ClientMessage::Audio(audio.data))
            }
            "stop" => Ok(ClientMessage::Stop),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ServerMessage {
    Partial {
        text: String,
    },
    Final {
        transcript: String,
        corrected: String,
        confidence: f64,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(err: &ProtocolError) -> Self {
        ServerMessage::Error {
            message: err.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        // plain strings and floats only, serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Everything a session can answer with: data frames, then maybe a close.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(ServerMessage),
    Close,
}

/// Problems reported to the client as `error` frames. None of them end the
/// session by themselves.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid start config: {0}")]
    InvalidStartConfig(String),

    #[error("invalid audio data")]
    InvalidAudioMessage,

    #[error("invalid base64 audio")]
    InvalidBase64,

    #[error("{0}")]
    InvalidAudio(String),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("stream already started")]
    AlreadyStarted,

    #[error("stream not started")]
    NotStarted,

    #[error("session closed")]
    SessionClosed,

    #[error("transcription error: {0}")]
    Recognition(String),

    #[error("too many pending frames, frame dropped")]
    Overloaded,
}

impl From<PcmError> for ProtocolError {
    fn from(err: PcmError) -> Self {
        match err {
            PcmError::InvalidBase64(_) => ProtocolError::InvalidBase64,
            other => ProtocolError::InvalidAudio(other.to_string()),
        }
    }
}
