//! # PCM Payload Codec
//!
//! Turns client payloads into samples and back:
//! - base64 text → bytes
//! - raw little-endian 16-bit PCM → samples
//! - 16-bit mono WAV container → samples + sample rate
//! - samples → WAV container (for the transcription backend upload)

use base64::{engine::general_purpose, Engine as _};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

const WAV_FORMAT_PCM: u16 = 1;

#[derive(Debug, Error)]
pub enum PcmError {
    #[error("invalid base64 audio data")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("empty audio data")]
    Empty,

    #[error("audio data length must be even for 16-bit samples (got {0} bytes)")]
    OddLength(usize),

    #[error("invalid WAV data: {0}")]
    InvalidWav(String),

    #[error("unsupported WAV layout: {0}")]
    UnsupportedWav(String),

    #[error("sample rate mismatch: expected {expected} Hz, got {actual} Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },
}

/// Samples decoded from a client payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<i16>,
    /// Only known when the payload carried a WAV header
    pub sample_rate: Option<u32>,
}

impl DecodedAudio {
    /// Fail unless the payload's own rate (if any) matches `expected`.
    pub fn ensure_rate(&self, expected: u32) -> Result<(), PcmError> {
        match self.sample_rate {
            Some(actual) if actual != expected => {
                Err(PcmError::SampleRateMismatch { expected, actual })
            }
            _ => Ok(()),
        }
    }
}

pub fn decode_base64(encoded: &str) -> Result<Vec<u8>, PcmError> {
    Ok(general_purpose::STANDARD.decode(encoded.trim())?)
}

/// Interpret `bytes` as little-endian signed 16-bit samples.
pub fn samples_from_le_bytes(bytes: &[u8]) -> Result<Vec<i16>, PcmError> {
    if bytes.is_empty() {
        return Err(PcmError::Empty);
    }
    if bytes.len() % 2 != 0 {
        return Err(PcmError::OddLength(bytes.len()));
    }

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }
    Ok(samples)
}

/// `RIFF....WAVE` magic at the start of the payload.
pub fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Decode either a WAV container or raw PCM.
pub fn decode_payload(bytes: &[u8]) -> Result<DecodedAudio, PcmError> {
    if is_wav(bytes) {
        return decode_wav(bytes);
    }
    Ok(DecodedAudio {
        samples: samples_from_le_bytes(bytes)?,
        sample_rate: None,
    })
}

/// Base64 text straight to samples, WAV or raw.
pub fn decode_base64_payload(encoded: &str) -> Result<DecodedAudio, PcmError> {
    let bytes = decode_base64(encoded)?;
    decode_payload(&bytes)
}

fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, PcmError> {
    let mut cursor = Cursor::new(bytes);
    let (header, data) =
        wav::read(&mut cursor).map_err(|e| PcmError::InvalidWav(e.to_string()))?;

    if header.audio_format != WAV_FORMAT_PCM {
        return Err(PcmError::UnsupportedWav(format!(
            "format tag {} (only PCM is accepted)",
            header.audio_format
        )));
    }
    if header.channel_count != 1 {
        return Err(PcmError::UnsupportedWav(format!(
            "{} channels (only mono is accepted)",
            header.channel_count
        )));
    }

    let samples = match data {
        wav::BitDepth::Sixteen(samples) => samples,
        _ => {
            return Err(PcmError::UnsupportedWav(format!(
                "{} bits per sample (only 16-bit is accepted)",
                header.bits_per_sample
            )))
        }
    };
    if samples.is_empty() {
        return Err(PcmError::Empty);
    }

    Ok(DecodedAudio {
        samples,
        sample_rate: Some(header.sampling_rate),
    })
}

/// Wrap mono 16-bit samples in a WAV container.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, PcmError> {
    let header = wav::Header::new(WAV_FORMAT_PCM, 1, sample_rate, 16);
    let mut out = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    wav::write(header, &wav::BitDepth::Sixteen(samples.to_vec()), &mut out)
        .map_err(|e| PcmError::InvalidWav(e.to_string()))?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_raw_pcm_decoding() {
        let bytes = le_bytes(&[0, 1, -1, i16::MAX, i16::MIN]);
        let samples = samples_from_le_bytes(&bytes).unwrap();
        assert_eq!(samples, vec![0, 1, -1, i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_little_endian_byte_order() {
        assert_eq!(
            samples_from_le_bytes(&[0x00, 0x01, 0xFF, 0xFF]).unwrap(),
            vec![256, -1]
        );
    }

    #[test]
    fn test_rejects_empty_and_odd_payloads() {
        assert!(matches!(samples_from_le_bytes(&[]), Err(PcmError::Empty)));
        assert!(matches!(
            samples_from_le_bytes(&[1, 2, 3]),
            Err(PcmError::OddLength(3))
        ));
    }

    #[test]
    fn test_invalid_base64() {
        let err = decode_base64_payload("not base64!!").unwrap_err();
        assert!(matches!(err, PcmError::InvalidBase64(_)));
        assert_eq!(err.to_string(), "invalid base64 audio data");
    }

    #[test]
    fn test_base64_raw_payload() {
        let encoded = general_purpose::STANDARD.encode(le_bytes(&[10, -10]));
        let decoded = decode_base64_payload(&encoded).unwrap();
        assert_eq!(decoded.samples, vec![10, -10]);
        assert_eq!(decoded.sample_rate, None);
        assert!(decoded.ensure_rate(16000).is_ok());
    }

    #[test]
    fn test_wav_payload_carries_its_rate() {
        let wav_bytes = encode_wav(&[1, 2, 3, 4], 8000).unwrap();
        assert!(is_wav(&wav_bytes));

        let decoded = decode_payload(&wav_bytes).unwrap();
        assert_eq!(decoded.samples, vec![1, 2, 3, 4]);
        assert_eq!(decoded.sample_rate, Some(8000));
        assert!(matches!(
            decoded.ensure_rate(16000),
            Err(PcmError::SampleRateMismatch { expected: 16000, actual: 8000 })
        ));
    }

    #[test]
    fn test_stereo_wav_is_rejected() {
        let header = wav::Header::new(WAV_FORMAT_PCM, 2, 16000, 16);
        let mut out = Cursor::new(Vec::new());
        wav::write(header, &wav::BitDepth::Sixteen(vec![1, 2, 3, 4]), &mut out).unwrap();

        let err = decode_payload(&out.into_inner()).unwrap_err();
        assert!(matches!(err, PcmError::UnsupportedWav(_)));
    }
}
