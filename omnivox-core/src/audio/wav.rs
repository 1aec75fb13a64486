//! WAV file helpers (hound): debug dumps of synthesis output and file playback.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::{Result, VoxError};
use crate::synthesis::SynthesizedAudio;

/// Write interleaved f32 samples as a 32-bit float WAV.
pub fn write_wav(path: &Path, samples: &[f32], channels: u16, sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: channels.max(1),
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for s in samples {
        writer.write_sample(*s)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Read a WAV file of any common PCM layout into f32 samples in [-1, 1].
pub fn read_wav(path: &Path) -> Result<SynthesizedAudio> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Int, bits @ 8..=32) => {
            let scale = (1i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
        (format, bits) => {
            return Err(VoxError::InvalidFormat(format!(
                "unsupported WAV layout: {format:?} {bits}-bit"
            )))
        }
    };

    Ok(SynthesizedAudio::new(samples, spec.sample_rate, spec.channels))
}
