//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! ## Design
//!
//! Synthesizers render at their own native rate (11 025 Hz is common for
//! formant engines) while the output device runs at the pipeline rate.
//! `RateConverter` bridges that gap on the producer thread, where allocation
//! is allowed. Each utterance is converted in one shot: full chunks first, then
//! the tail and the resampler's internal delay are flushed so no audio is lost.
//!
//! When source rate == target rate, `RateConverter` is a passthrough — no
//! rubato session is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::error::{Result, VoxError};

/// Input frames per rubato call.
pub const RESAMPLE_CHUNK: usize = 1024;

/// Converts interleaved f32 audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    channels: usize,
    ratio: f64,
    /// Pre-allocated output buffer: `[channels][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a converter for `channels` interleaved channels.
    ///
    /// # Errors
    /// Returns `VoxError::InvalidFormat` if rubato fails to initialise.
    pub fn new(source_rate: u32, target_rate: u32, channels: u16) -> Result<Self> {
        let channels = channels.max(1) as usize;
        let ratio = target_rate as f64 / source_rate.max(1) as f64;

        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                channels,
                ratio,
                output_buf: Vec::new(),
            });
        }

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio — no dynamic adjustment
            PolynomialDegree::Cubic,
            RESAMPLE_CHUNK,
            channels,
        )
        .map_err(|e| VoxError::InvalidFormat(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; channels];

        tracing::debug!(source_rate, target_rate, channels, "resampler created");

        Ok(Self {
            resampler: Some(resampler),
            channels,
            ratio,
            output_buf,
        })
    }

    /// Convert a complete interleaved buffer. Output length is
    /// `round(frames * ratio)` frames.
    pub fn convert(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let ch = self.channels;
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(samples.to_vec());
        };

        let frames = samples.len() / ch;
        let expected = (frames as f64 * self.ratio).round() as usize;
        let delay = resampler.output_delay();

        let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(frames); ch];
        for frame in samples.chunks_exact(ch) {
            for (c, s) in frame.iter().enumerate() {
                planar[c].push(*s);
            }
        }

        let mut produced_planar: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); ch];
        let mut pos = 0usize;

        while frames - pos >= resampler.input_frames_next() {
            let need = resampler.input_frames_next();
            let input: Vec<&[f32]> = planar.iter().map(|c| &c[pos..pos + need]).collect();
            let (consumed, produced) = resampler
                .process_into_buffer(&input[..], &mut self.output_buf, None)
                .map_err(|e| VoxError::InvalidFormat(format!("resample: {e}")))?;
            for c in 0..ch {
                produced_planar[c].extend_from_slice(&self.output_buf[c][..produced]);
            }
            pos += consumed;
        }

        if pos < frames {
            let tail: Vec<&[f32]> = planar.iter().map(|c| &c[pos..]).collect();
            let (_, produced) = resampler
                .process_partial_into_buffer(Some(&tail[..]), &mut self.output_buf, None)
                .map_err(|e| VoxError::InvalidFormat(format!("resample tail: {e}")))?;
            for c in 0..ch {
                produced_planar[c].extend_from_slice(&self.output_buf[c][..produced]);
            }
        }

        // Push the resampler's internal delay out with silence until the
        // expected length is covered.
        while produced_planar[0].len() < delay + expected {
            let (_, produced) = resampler
                .process_partial_into_buffer(None::<&[&[f32]]>, &mut self.output_buf, None)
                .map_err(|e| VoxError::InvalidFormat(format!("resample flush: {e}")))?;
            if produced == 0 {
                break;
            }
            for c in 0..ch {
                produced_planar[c].extend_from_slice(&self.output_buf[c][..produced]);
            }
        }
        resampler.reset();

        let available = produced_planar[0].len().saturating_sub(delay).min(expected);
        let mut out = Vec::with_capacity(available * ch);
        for i in 0..available {
            for channel in &produced_planar {
                out.push(channel[delay + i]);
            }
        }
        Ok(out)
    }

    /// Returns `true` when source rate == target rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(11_025, 11_025, 2).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.convert(&samples).unwrap(), samples);
    }

    #[test]
    fn upsample_11k_to_44k_length() {
        let mut rc = RateConverter::new(11_025, 44_100, 1).unwrap();
        assert!(!rc.is_passthrough());
        let out = rc.convert(&vec![0.1f32; 2_500]).unwrap();
        assert_eq!(out.len(), 10_000);
    }

    #[test]
    fn downsample_stereo_keeps_frames_whole() {
        let mut rc = RateConverter::new(48_000, 16_000, 2).unwrap();
        let out = rc.convert(&vec![0.0f32; 4_800 * 2]).unwrap();
        assert_eq!(out.len(), 1_600 * 2);
    }

    #[test]
    fn short_input_still_produces_output() {
        let mut rc = RateConverter::new(11_025, 22_050, 1).unwrap();
        let out = rc.convert(&vec![0.2f32; 100]).unwrap();
        assert_eq!(out.len(), 200);
    }

    #[test]
    fn converter_is_reusable() {
        let mut rc = RateConverter::new(11_025, 44_100, 1).unwrap();
        let a = rc.convert(&vec![0.1f32; 1_500]).unwrap();
        let b = rc.convert(&vec![0.1f32; 1_500]).unwrap();
        assert_eq!(a.len(), b.len());
    }
}
