//! Audio output via cpal backend.
//!
//! # Design constraints
//!
//! The cpal output callback runs on an OS audio thread at elevated priority.
//! It **must not**:
//! - Allocate heap memory
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! All of that is delegated to the [`FrameSource`] it pulls from. Integer
//! device formats render into a scratch buffer sized once at open time.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on macOS).
//! `AudioOutput` therefore must be created and dropped on the same thread.
//! The engine accomplishes this by opening it inside its dedicated device thread.

pub mod device;
pub mod resample;
pub mod wav;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig, SupportedStreamConfig,
};

use crate::{
    error::{Result, VoxError},
    playback::FrameSource,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Requested device format.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per callback block.
    pub frames_per_buffer: u32,
    /// Device name to prefer over the system default.
    pub preferred_device: Option<String>,
}

/// Handle to an open audio output stream.
///
/// **Not `Send`** — `cpal::Stream` is bound to its creation thread on Windows/macOS.
/// Create and drop this type on the same OS thread.
pub struct AudioOutput {
    #[cfg(feature = "audio-cpal")]
    stream: Stream,
    /// Cleared by the callback once the source reports `Complete`, or by an
    /// error callback.
    active: Arc<AtomicBool>,
    pub device_name: String,
    pub sample_rate: u32,
}

#[cfg(feature = "audio-cpal")]
impl AudioOutput {
    /// Open an output device and build (but do not start) a stream that pulls
    /// from `source`.
    ///
    /// # Errors
    /// `VoxError::NoDefaultOutputDevice` when nothing can be opened,
    /// `VoxError::AudioDevice` when the device offers no matching format,
    /// `VoxError::AudioStream` if cpal fails to build the stream.
    pub fn open(config: &OutputConfig, source: Box<dyn FrameSource>) -> Result<Self> {
        let host = cpal::default_host();
        let device = Self::select_device(&host, config.preferred_device.as_deref())?;
        let device_name = device.name().unwrap_or_default();

        info!(device = device_name.as_str(), "opening output device");

        let supported = Self::pick_config(&device, config)?;
        let sample_format = supported.sample_format();
        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(config.frames_per_buffer),
        };

        info!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            frames_per_buffer = config.frames_per_buffer,
            ?sample_format,
            "output config selected"
        );

        let active = Arc::new(AtomicBool::new(true));
        let scratch_len = config.frames_per_buffer as usize * config.channels as usize;

        let stream = match sample_format {
            SampleFormat::F32 => {
                let mut source = source;
                let active_cb = Arc::clone(&active);
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _info| {
                        if source.render(data) == crate::playback::StreamFlow::Complete {
                            active_cb.store(false, Ordering::Release);
                        }
                    },
                    Self::error_callback(Arc::clone(&active)),
                    None,
                )
            }

            SampleFormat::I16 => {
                let mut source = source;
                let active_cb = Arc::clone(&active);
                let mut scratch = vec![0f32; scratch_len];
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], _info| {
                        let buf = scratch_slice(&mut scratch, data.len());
                        let flow = source.render(buf);
                        for (out, s) in data.iter_mut().zip(buf.iter()) {
                            *out = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                        }
                        if flow == crate::playback::StreamFlow::Complete {
                            active_cb.store(false, Ordering::Release);
                        }
                    },
                    Self::error_callback(Arc::clone(&active)),
                    None,
                )
            }

            SampleFormat::U16 => {
                let mut source = source;
                let active_cb = Arc::clone(&active);
                let mut scratch = vec![0f32; scratch_len];
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [u16], _info| {
                        let buf = scratch_slice(&mut scratch, data.len());
                        let flow = source.render(buf);
                        for (out, s) in data.iter_mut().zip(buf.iter()) {
                            *out = ((s.clamp(-1.0, 1.0) + 1.0) * 32_767.5) as u16;
                        }
                        if flow == crate::playback::StreamFlow::Complete {
                            active_cb.store(false, Ordering::Release);
                        }
                    },
                    Self::error_callback(Arc::clone(&active)),
                    None,
                )
            }

            fmt => {
                return Err(VoxError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| VoxError::AudioStream(e.to_string()))?;

        Ok(Self {
            stream,
            active,
            device_name,
            sample_rate: config.sample_rate,
        })
    }

    /// Begin pulling blocks from the source.
    pub fn start(&self) -> Result<()> {
        self.stream
            .play()
            .map_err(|e| VoxError::AudioStream(e.to_string()))?;
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    /// Pause the device. Dropping the handle closes it.
    pub fn stop(&self) -> Result<()> {
        self.active.store(false, Ordering::Release);
        self.stream
            .pause()
            .map_err(|e| VoxError::AudioStream(e.to_string()))
    }

    fn select_device(host: &cpal::Host, preferred: Option<&str>) -> Result<cpal::Device> {
        if let Some(wanted) = preferred {
            match host.output_devices() {
                Ok(mut devices) => {
                    if let Some(found) =
                        devices.find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                    {
                        return Ok(found);
                    }
                    warn!("preferred output device '{wanted}' not found, falling back");
                }
                Err(e) => warn!("failed to list output devices while resolving preference: {e}"),
            }
        }

        if let Some(default) = host.default_output_device() {
            return Ok(default);
        }
        let mut devices = host
            .output_devices()
            .map_err(|e| VoxError::AudioDevice(e.to_string()))?;
        let fallback = devices.next().ok_or(VoxError::NoDefaultOutputDevice)?;
        warn!("no default output device, falling back to first available output");
        Ok(fallback)
    }

    /// First supported range matching channels and rate, F32 preferred.
    fn pick_config(device: &cpal::Device, config: &OutputConfig) -> Result<SupportedStreamConfig> {
        let rate = SampleRate(config.sample_rate);
        let ranges: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| VoxError::AudioDevice(e.to_string()))?
            .filter(|r| {
                r.channels() == config.channels
                    && r.min_sample_rate() <= rate
                    && r.max_sample_rate() >= rate
            })
            .collect();

        let chosen = ranges
            .iter()
            .find(|r| r.sample_format() == SampleFormat::F32)
            .or_else(|| ranges.first())
            .cloned()
            .ok_or_else(|| {
                VoxError::AudioDevice(format!(
                    "device has no {} Hz / {}-channel output format",
                    config.sample_rate, config.channels
                ))
            })?;
        Ok(chosen.with_sample_rate(rate))
    }

    fn error_callback(active: Arc<AtomicBool>) -> impl FnMut(cpal::StreamError) + Send + 'static {
        move |err| {
            error!("audio stream error: {err}");
            active.store(false, Ordering::Release);
        }
    }
}

/// Borrow `len` samples of the pre-sized scratch buffer. Only grows (and so
/// allocates) if the host hands over a larger block than was configured.
#[cfg(feature = "audio-cpal")]
fn scratch_slice(scratch: &mut Vec<f32>, len: usize) -> &mut [f32] {
    if scratch.len() < len {
        scratch.resize(len, 0.0);
    }
    &mut scratch[..len]
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioOutput {
    pub fn open(_config: &OutputConfig, _source: Box<dyn FrameSource>) -> Result<Self> {
        Err(VoxError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn start(&self) -> Result<()> {
        Err(VoxError::NotRunning)
    }

    pub fn stop(&self) -> Result<()> {
        self.active.store(false, Ordering::Release);
        Ok(())
    }
}

impl AudioOutput {
    /// `false` once the stream errored, was paused, or drained to `Complete`.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}
