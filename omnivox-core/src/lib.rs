//! # omnivox-core
//!
//! Speech playback pipeline: synthesized audio from a blocking producer to a
//! real-time output device without gaps or priority-inversion stalls.
//!
//! ## Architecture
//!
//! ```text
//! text → SynthesisWorker (resample, upmix) → AudioItemQueue ─┐
//!                                        └─► SPSC sample ring ┤
//!                                                             │ FrameSource::render
//!                                             cpal output callback (never blocks)
//!                                                             │
//!                              retirement channel → reclaimer → Condvar / events
//! ```
//!
//! The output callback is zero-alloc. All heap work happens on producer and
//! reclaimer threads.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod playback;
pub mod synthesis;

// Convenience re-exports for downstream crates
pub use buffering::{AudioItem, AudioItemQueue, ItemId};
pub use engine::{BufferingMode, EngineConfig, VoxEngine};
pub use error::{Result, VoxError};
pub use ipc::events::{
    EngineStatus, EngineStatusEvent, PipelineEvent, PipelineEventKind, RejectReason,
};
pub use playback::{DiagnosticsSnapshot, FrameSource, StreamFlow};
pub use synthesis::{SpeechSynthesizer, StubSynthesizer, SynthHandle, VoiceChannel};
