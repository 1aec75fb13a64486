//! `StubSynthesizer` — placeholder engine that beeps instead of speaking.
//!
//! Lets the full dispatcher → queue → device path run without a vendor TTS.
//! Every word becomes a short mono tone whose pitch is derived from the word's
//! bytes, followed by a gap; the word length scales with the speaking rate.
//! Output is deterministic for a given text and rate.

use tracing::debug;

use super::{clamp_rate, tone, SpeechSynthesizer, SynthesizedAudio, DEFAULT_RATE_WPM};
use crate::error::{Result, VoxError};

/// Native rate of the stub engine (matches classic formant synthesizers).
pub const STUB_SAMPLE_RATE: u32 = 11_025;

const BASE_PITCH_HZ: f32 = 140.0;
const PITCH_SPAN_HZ: u32 = 160;
/// Fraction of each word slot that is voiced; the rest is the inter-word gap.
const VOICED_FRACTION: f32 = 0.75;
const AMPLITUDE: f32 = 0.4;

pub struct StubSynthesizer {
    started: bool,
    rate_wpm: u32,
    sample_rate: u32,
}

impl StubSynthesizer {
    pub fn new() -> Self {
        Self {
            started: false,
            rate_wpm: DEFAULT_RATE_WPM,
            sample_rate: STUB_SAMPLE_RATE,
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate_wpm
    }

    fn word_pitch(word: &str) -> f32 {
        let sum: u32 = word.bytes().map(u32::from).sum();
        BASE_PITCH_HZ + (sum % PITCH_SPAN_HZ) as f32
    }
}

impl Default for StubSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechSynthesizer for StubSynthesizer {
    fn start(&mut self) -> Result<()> {
        debug!("StubSynthesizer::start — no-op");
        self.started = true;
        Ok(())
    }

    fn synthesize(&mut self, text: &str) -> Result<SynthesizedAudio> {
        if !self.started {
            return Err(VoxError::EngineNotStarted);
        }

        let slot_ms = 60_000 / self.rate_wpm;
        let voiced_ms = (slot_ms as f32 * VOICED_FRACTION) as u32;
        let gap = tone::generate_silence(slot_ms - voiced_ms, self.sample_rate, 1);

        let mut samples = Vec::new();
        for word in text.split_whitespace() {
            let voiced = tone::generate_tone(Self::word_pitch(word), voiced_ms, self.sample_rate, 1);
            samples.extend(voiced.into_iter().map(|s| s * AMPLITUDE));
            samples.extend_from_slice(&gap);
        }

        debug!(
            words = text.split_whitespace().count(),
            frames = samples.len(),
            rate_wpm = self.rate_wpm,
            "stub synthesis done"
        );
        Ok(SynthesizedAudio::mono(samples, self.sample_rate))
    }

    fn set_rate(&mut self, words_per_minute: u32) -> Result<()> {
        self.rate_wpm = clamp_rate(words_per_minute);
        Ok(())
    }

    fn shutdown(&mut self) {
        debug!("StubSynthesizer::shutdown");
        self.started = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_before_start() {
        let mut synth = StubSynthesizer::new();
        assert!(matches!(
            synth.synthesize("hello"),
            Err(VoxError::EngineNotStarted)
        ));
    }

    #[test]
    fn one_slot_per_word() {
        let mut synth = StubSynthesizer::new();
        synth.start().unwrap();
        let one = synth.synthesize("hello").unwrap();
        let three = synth.synthesize("hello big world").unwrap();
        assert_eq!(one.channels, 1);
        assert_eq!(one.sample_rate, STUB_SAMPLE_RATE);
        assert_eq!(three.frame_count, one.frame_count * 3);
    }

    #[test]
    fn whitespace_only_text_is_empty() {
        let mut synth = StubSynthesizer::new();
        synth.start().unwrap();
        assert!(synth.synthesize("   ").unwrap().is_empty());
    }

    #[test]
    fn faster_rate_is_shorter() {
        let mut synth = StubSynthesizer::new();
        synth.start().unwrap();
        let normal = synth.synthesize("testing").unwrap();
        synth.set_rate(360).unwrap();
        let fast = synth.synthesize("testing").unwrap();
        assert!(fast.frame_count < normal.frame_count);
    }

    #[test]
    fn rate_is_clamped() {
        let mut synth = StubSynthesizer::new();
        synth.set_rate(5).unwrap();
        assert_eq!(synth.rate(), 75);
        synth.set_rate(10_000).unwrap();
        assert_eq!(synth.rate(), 600);
    }

    #[test]
    fn shutdown_stops_engine() {
        let mut synth = StubSynthesizer::new();
        synth.start().unwrap();
        synth.shutdown();
        assert!(synth.synthesize("hi").is_err());
    }
}
