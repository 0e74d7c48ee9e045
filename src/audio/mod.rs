//! # Audio Pipeline
//!
//! Everything between the microphone (or a client payload) and the
//! recognizer:
//!
//! - **ring_buffer**: bounded circular sample store shared by two threads
//! - **vad**: energy/hysteresis speech detector
//! - **capture**: hardware callback → bounded async stream
//! - **pcm**: base64 / raw PCM / WAV decoding and WAV encoding
//!
//! ## Audio Format:
//! - **Sample Rate**: 16kHz by default (configurable, but fixed per process)
//! - **Bit Depth**: 16-bit signed PCM, little-endian on the wire
//! - **Channels**: mono

pub mod capture;
#[cfg(feature = "cpal-audio")]
pub mod cpal_driver;
pub mod pcm;
pub mod ring_buffer;
pub mod vad;

pub use capture::{CaptureDriver, CaptureError, CaptureParams, CaptureSession};
pub use ring_buffer::RingBuffer;
pub use vad::{VadConfig, VoiceActivityDetector};
