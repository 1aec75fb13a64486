//! Tone and silence generators for non-speech items.

use std::f32::consts::PI;

use crate::error::{Result, VoxError};

/// Longest tone or silence accepted as a single item (one minute).
pub const MAX_DURATION_MS: u32 = 60_000;

/// Fade applied to both ends of a tone so it starts and stops without a click.
const RAMP_SECS: f32 = 0.005;

/// Number of frames in `duration_ms` at `sample_rate`.
pub fn frames_for(duration_ms: u32, sample_rate: u32) -> usize {
    (duration_ms as u64 * sample_rate as u64 / 1000) as usize
}

/// Check a tone request before any buffer is sized from it.
pub fn validate_tone(frequency: f32, duration_ms: u32) -> Result<()> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return Err(VoxError::InvalidRequest(format!(
            "tone frequency must be a positive number of Hz, got {frequency}"
        )));
    }
    validate_duration(duration_ms)
}

/// Check a tone or silence length against [`MAX_DURATION_MS`].
pub fn validate_duration(duration_ms: u32) -> Result<()> {
    if duration_ms > MAX_DURATION_MS {
        return Err(VoxError::InvalidRequest(format!(
            "duration {duration_ms} ms exceeds the {MAX_DURATION_MS} ms limit"
        )));
    }
    Ok(())
}

/// Sine at `frequency` Hz, identical on every channel, interleaved.
pub fn generate_tone(frequency: f32, duration_ms: u32, sample_rate: u32, channels: u16) -> Vec<f32> {
    let frames = frames_for(duration_ms, sample_rate);
    let ch = channels.max(1) as usize;
    let ramp = ((RAMP_SECS * sample_rate as f32) as usize).min(frames / 2).max(1);

    let mut out = Vec::with_capacity(frames * ch);
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let edge = i.min(frames - 1 - i);
        let gain = (edge as f32 / ramp as f32).min(1.0);
        let sample = (2.0 * PI * frequency * t).sin() * gain;
        out.extend(std::iter::repeat(sample).take(ch));
    }
    out
}

/// `duration_ms` of digital silence, interleaved.
pub fn generate_silence(duration_ms: u32, sample_rate: u32, channels: u16) -> Vec<f32> {
    vec![0.0; frames_for(duration_ms, sample_rate) * channels.max(1) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn tone_length_matches_duration() {
        let tone = generate_tone(440.0, 500, 44_100, 2);
        assert_eq!(tone.len(), 22_050 * 2);
    }

    #[test]
    fn tone_channels_are_identical() {
        let tone = generate_tone(440.0, 50, 11_025, 2);
        for frame in tone.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn tone_starts_and_ends_near_zero() {
        let tone = generate_tone(1_000.0, 100, 11_025, 1);
        assert_abs_diff_eq!(tone[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(*tone.last().unwrap(), 0.0, epsilon = 1e-6);
        let peak = tone.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.9, "peak={peak}");
    }

    #[test]
    fn silence_is_all_zero() {
        let silence = generate_silence(20, 11_025, 2);
        assert_eq!(silence.len(), 220 * 2);
        assert!(silence.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn oversized_and_non_finite_requests_are_refused() {
        assert!(validate_tone(440.0, MAX_DURATION_MS).is_ok());
        assert!(matches!(
            validate_tone(440.0, u32::MAX),
            Err(VoxError::InvalidRequest(_))
        ));
        assert!(validate_tone(f32::INFINITY, 100).is_err());
        assert!(validate_tone(f32::NAN, 100).is_err());
        assert!(validate_tone(-5.0, 100).is_err());
        assert!(validate_duration(MAX_DURATION_MS + 1).is_err());
    }

    #[test]
    fn zero_duration_tone_is_empty() {
        assert!(generate_tone(440.0, 0, 11_025, 2).is_empty());
    }
}
