//! Speech synthesizer abstraction.
//!
//! The `SpeechSynthesizer` trait decouples the pipeline from any specific
//! engine (the built-in stub, a vendor TTS behind FFI, a network voice, ...).
//!
//! `&mut self` on `synthesize` expresses that engines are stateful (voice
//! settings, rate, internal buffers). All calls are therefore serialised
//! through `SynthHandle`'s `parking_lot::Mutex`, and every one of them may
//! block — they only ever run on producer threads.

pub mod stub;
pub mod tone;
pub mod worker;

pub use stub::StubSynthesizer;
pub use worker::{SynthesisWorker, VoiceChannel, WorkerConfig};

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// Slowest speaking rate accepted by `set_rate`, in words per minute.
pub const MIN_RATE_WPM: u32 = 75;
/// Fastest speaking rate accepted by `set_rate`, in words per minute.
pub const MAX_RATE_WPM: u32 = 600;
pub const DEFAULT_RATE_WPM: u32 = 180;

/// Raw engine output: interleaved f32 PCM at the engine's own rate.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub samples: Vec<f32>,
    pub frame_count: usize,
    pub sample_rate: u32,
    pub channels: u16,
}

impl SynthesizedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        let channels = channels.max(1);
        let frame_count = samples.len() / channels as usize;
        Self {
            samples,
            frame_count,
            sample_rate,
            channels,
        }
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(samples, sample_rate, 1)
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count == 0
    }
}

/// Contract for text-to-speech engines.
pub trait SpeechSynthesizer: Send + 'static {
    /// Bring the engine up. Called once before the first `synthesize`.
    ///
    /// # Errors
    /// `VoxError::EngineInit` when voice data or the backend is unavailable.
    fn start(&mut self) -> Result<()>;

    /// Render `text` to memory. Blocks for the duration of generation.
    ///
    /// An engine may return an empty buffer (nothing pronounceable); the
    /// worker turns that into `VoxError::EmptyUtterance`.
    fn synthesize(&mut self, text: &str) -> Result<SynthesizedAudio>;

    /// Change speaking rate. Values outside
    /// [`MIN_RATE_WPM`]..=[`MAX_RATE_WPM`] are clamped.
    fn set_rate(&mut self, words_per_minute: u32) -> Result<()>;

    /// Release engine resources. Further `synthesize` calls fail.
    fn shutdown(&mut self);
}

/// Thread-safe reference-counted handle to any `SpeechSynthesizer` implementor.
#[derive(Clone)]
pub struct SynthHandle(pub Arc<Mutex<dyn SpeechSynthesizer>>);

impl SynthHandle {
    pub fn new<S: SpeechSynthesizer>(synth: S) -> Self {
        Self(Arc::new(Mutex::new(synth)))
    }
}

impl std::fmt::Debug for SynthHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthHandle").finish_non_exhaustive()
    }
}

pub(crate) fn clamp_rate(words_per_minute: u32) -> u32 {
    words_per_minute.clamp(MIN_RATE_WPM, MAX_RATE_WPM)
}
