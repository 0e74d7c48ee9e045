//! # Voice Activity Detection
//!
//! Energy-based speech detector with hysteresis. Each chunk is classified by
//! its RMS energy, and the detector only changes its mind after enough
//! consecutive audio of the other kind:
//!
//! - speech must last `min_speech` before `is_speech` turns on
//! - silence must last `min_silence` before it turns off again
//!
//! Durations are tracked in samples so the thresholds are exact regardless
//! of chunk size.

use crate::config::VadSettings;

/// Detector parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct VadConfig {
    pub sample_rate: u32,
    pub energy_threshold: f64,
    pub min_speech_ms: u64,
    pub min_silence_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            energy_threshold: 500.0,
            min_speech_ms: 100,
            min_silence_ms: 500,
        }
    }
}

impl VadConfig {
    pub fn from_settings(settings: &VadSettings, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            energy_threshold: settings.energy_threshold,
            min_speech_ms: settings.min_speech_ms,
            min_silence_ms: settings.min_silence_ms,
        }
    }

    fn ms_to_samples(&self, ms: u64) -> u64 {
        ms * u64::from(self.sample_rate) / 1000
    }
}

/// Stateful speech/silence classifier. Not shared: one per audio stream.
#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    config: VadConfig,
    min_speech_samples: u64,
    min_silence_samples: u64,
    speech_samples: u64,
    silence_samples: u64,
    is_speech: bool,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Self {
        let min_speech_samples = config.ms_to_samples(config.min_speech_ms);
        let min_silence_samples = config.ms_to_samples(config.min_silence_ms);
        Self {
            config,
            min_speech_samples,
            min_silence_samples,
            speech_samples: 0,
            silence_samples: 0,
            is_speech: false,
        }
    }

    /// Feed one chunk and return the (possibly unchanged) speech state.
    ///
    /// An empty chunk carries no duration and leaves the state alone.
    pub fn process(&mut self, chunk: &[i16]) -> bool {
        if chunk.is_empty() {
            return self.is_speech;
        }

        let duration = chunk.len() as u64;
        if rms(chunk) > self.config.energy_threshold {
            self.speech_samples += duration;
            self.silence_samples = 0;
            if self.speech_samples >= self.min_speech_samples {
                self.is_speech = true;
            }
        } else {
            self.silence_samples += duration;
            self.speech_samples = 0;
            if self.silence_samples >= self.min_silence_samples {
                self.is_speech = false;
            }
        }

        self.is_speech
    }

    pub fn is_speech(&self) -> bool {
        self.is_speech
    }

    pub fn reset(&mut self) {
        self.speech_samples = 0;
        self.silence_samples = 0;
        self.is_speech = false;
    }
}

/// Root-mean-square energy of a chunk (0.0 for an empty one).
pub fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum / samples.len() as f64).sqrt()
}
