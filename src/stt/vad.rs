//! Energy-based voice activity detection
//!
//! Classifies PCM chunks by normalized RMS energy and segments the stream
//! into utterances using the configured minimum speech and silence
//! durations. Available for clients that stream continuously instead of
//! using push-to-talk framing.

use crate::audio::compute_rms;
use crate::config::VadConfig;

/// Full-scale reference for normalizing RMS energy to [0, 1]
const FULL_SCALE: f32 = 32768.0;

/// Scale factor mapping typical speech energy onto the 0..1 threshold range
const ENERGY_GAIN: f32 = 10.0;

/// Utterance boundary events produced by the segmenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStart,
    SpeechEnd,
}

/// Energy-based voice activity detector.
pub struct EnergyVad {
    threshold: f32,
    sample_rate: u32,
    min_speech_ms: u32,
    min_silence_ms: u32,
    in_speech: bool,
    speech_ms: f32,
    silence_ms: f32,
}

impl EnergyVad {
    pub fn new(config: &VadConfig, sample_rate: u32) -> Self {
        Self {
            threshold: config.threshold,
            sample_rate,
            min_speech_ms: config.min_speech_duration_ms,
            min_silence_ms: config.min_silence_duration_ms,
            in_speech: false,
            speech_ms: 0.0,
            silence_ms: 0.0,
        }
    }

    /// Speech probability for one PCM s16le chunk, in [0, 1].
    pub fn speech_probability(&self, chunk: &[u8]) -> f32 {
        let energy = compute_rms(chunk) / FULL_SCALE;
        (energy * ENERGY_GAIN).min(1.0)
    }

    /// Feed one chunk; returns an utterance boundary event when the
    /// configured speech/silence durations are crossed.
    pub fn process(&mut self, chunk: &[u8]) -> Option<VadEvent> {
        if chunk.len() < 2 {
            return None;
        }
        let chunk_ms = (chunk.len() / 2) as f32 * 1000.0 / self.sample_rate as f32;
        let is_speech = self.speech_probability(chunk) >= self.threshold;

        if is_speech {
            self.speech_ms += chunk_ms;
            self.silence_ms = 0.0;
            if !self.in_speech && self.speech_ms >= self.min_speech_ms as f32 {
                self.in_speech = true;
                return Some(VadEvent::SpeechStart);
            }
        } else {
            self.silence_ms += chunk_ms;
            self.speech_ms = 0.0;
            if self.in_speech && self.silence_ms >= self.min_silence_ms as f32 {
                self.in_speech = false;
                return Some(VadEvent::SpeechEnd);
            }
        }
        None
    }

    /// Reset state between utterances.
    pub fn reset(&mut self) {
        self.in_speech = false;
        self.speech_ms = 0.0;
        self.silence_ms = 0.0;
    }

    pub fn is_in_speech(&self) -> bool {
        self.in_speech
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loud_chunk(ms: u32) -> Vec<u8> {
        let samples = (16_000 * ms / 1000) as usize;
        (0..samples).flat_map(|_| 20_000i16.to_le_bytes()).collect()
    }

    fn quiet_chunk(ms: u32) -> Vec<u8> {
        let samples = (16_000 * ms / 1000) as usize;
        (0..samples).flat_map(|_| 50i16.to_le_bytes()).collect()
    }

    fn vad() -> EnergyVad {
        EnergyVad::new(
            &VadConfig {
                threshold: 0.5,
                min_speech_duration_ms: 250,
                min_silence_duration_ms: 800,
            },
            16_000,
        )
    }

    #[test]
    fn test_probability_bounds() {
        let vad = vad();
        assert!(vad.speech_probability(&quiet_chunk(100)) < 0.1);
        let p = vad.speech_probability(&loud_chunk(100));
        assert!(p > 0.5 && p <= 1.0);
    }

    #[test]
    fn test_speech_start_requires_min_duration() {
        let mut vad = vad();
        // 100ms of speech is below the 250ms onset requirement
        assert_eq!(vad.process(&loud_chunk(100)), None);
        assert!(!vad.is_in_speech());
        // Crossing 250ms total fires SpeechStart once
        assert_eq!(vad.process(&loud_chunk(200)), Some(VadEvent::SpeechStart));
        assert!(vad.is_in_speech());
        assert_eq!(vad.process(&loud_chunk(100)), None);
    }

    #[test]
    fn test_speech_end_requires_min_silence() {
        let mut vad = vad();
        vad.process(&loud_chunk(300));
        assert!(vad.is_in_speech());

        assert_eq!(vad.process(&quiet_chunk(400)), None);
        assert_eq!(vad.process(&quiet_chunk(500)), Some(VadEvent::SpeechEnd));
        assert!(!vad.is_in_speech());
    }

    #[test]
    fn test_brief_silence_does_not_end_utterance() {
        let mut vad = vad();
        vad.process(&loud_chunk(300));
        assert_eq!(vad.process(&quiet_chunk(100)), None);
        // Speech resumes; silence counter resets
        assert_eq!(vad.process(&loud_chunk(300)), None);
        assert!(vad.is_in_speech());
    }

    #[test]
    fn test_reset() {
        let mut vad = vad();
        vad.process(&loud_chunk(300));
        vad.reset();
        assert!(!vad.is_in_speech());
    }

    #[test]
    fn test_tiny_chunk_ignored() {
        let mut vad = vad();
        assert_eq!(vad.process(&[0]), None);
    }
}
