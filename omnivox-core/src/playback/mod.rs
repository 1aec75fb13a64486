//! Real-time consumer side of the pipeline.
//!
//! The device driver calls back into a [`FrameSource`] once per block on its
//! own clocked thread. Implementations **must not**:
//! - Allocate or free heap memory
//! - Block on a mutex or condvar
//! - Perform I/O or log per block
//!
//! Every sample of the output block is written on every call; anything the
//! source cannot supply is zero.

pub mod queue_source;
pub mod stream_source;

pub use queue_source::QueuePlayback;
pub use stream_source::StreamPlayback;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// What the device should do after a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFlow {
    /// Keep the stream open; more audio may arrive.
    Continue,
    /// Shutdown was requested; the block just rendered is silence.
    Complete,
}

/// "Pull one block of frames" — the only capability the device needs.
///
/// `out` holds interleaved samples for `out.len() / channels()` frames.
pub trait FrameSource: Send + 'static {
    fn render(&mut self, out: &mut [f32]) -> StreamFlow;

    /// Interleaved channel count the source produces.
    fn channels(&self) -> u16;
}

/// Flags shared between the control thread and the device callback.
#[derive(Debug, Default)]
pub struct PlaybackControl {
    shutdown: AtomicBool,
    /// Bumped by `stop()` in streaming mode; the callback clears the ring.
    flush_generation: AtomicU64,
}

impl PlaybackControl {
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Re-arm after a shutdown so the stream can be reopened.
    pub fn reset(&self) {
        self.shutdown.store(false, Ordering::Release);
    }

    pub fn request_flush(&self) {
        self.flush_generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn flush_generation(&self) -> u64 {
        self.flush_generation.load(Ordering::Acquire)
    }
}

/// Lock-free counters written by both sides of the pipeline.
#[derive(Debug, Default)]
pub struct PlaybackDiagnostics {
    pub blocks_rendered: AtomicUsize,
    pub frames_emitted: AtomicUsize,
    pub silent_blocks: AtomicUsize,
    /// Blocks that fell short: lock contention or a ring that ran dry.
    pub underruns: AtomicUsize,
    pub items_started: AtomicUsize,
    pub items_finished: AtomicUsize,
    pub items_skipped: AtomicUsize,
    /// Exhausted items dropped on the device thread because no parking slot
    /// was left.
    pub reclaim_overflow: AtomicUsize,
    pub items_enqueued: AtomicUsize,
    pub items_rejected: AtomicUsize,
    pub synthesis_errors: AtomicUsize,
    pub stream_frames_dropped: AtomicUsize,
}

impl PlaybackDiagnostics {
    pub fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn counters(&self) -> [&AtomicUsize; 12] {
        [
            &self.blocks_rendered,
            &self.frames_emitted,
            &self.silent_blocks,
            &self.underruns,
            &self.items_started,
            &self.items_finished,
            &self.items_skipped,
            &self.reclaim_overflow,
            &self.items_enqueued,
            &self.items_rejected,
            &self.synthesis_errors,
            &self.stream_frames_dropped,
        ]
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            blocks_rendered: self.blocks_rendered.load(Ordering::Relaxed),
            frames_emitted: self.frames_emitted.load(Ordering::Relaxed),
            silent_blocks: self.silent_blocks.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            items_started: self.items_started.load(Ordering::Relaxed),
            items_finished: self.items_finished.load(Ordering::Relaxed),
            items_skipped: self.items_skipped.load(Ordering::Relaxed),
            reclaim_overflow: self.reclaim_overflow.load(Ordering::Relaxed),
            items_enqueued: self.items_enqueued.load(Ordering::Relaxed),
            items_rejected: self.items_rejected.load(Ordering::Relaxed),
            synthesis_errors: self.synthesis_errors.load(Ordering::Relaxed),
            stream_frames_dropped: self.stream_frames_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub blocks_rendered: usize,
    pub frames_emitted: usize,
    pub silent_blocks: usize,
    pub underruns: usize,
    pub items_started: usize,
    pub items_finished: usize,
    pub items_skipped: usize,
    pub reclaim_overflow: usize,
    pub items_enqueued: usize,
    pub items_rejected: usize,
    pub synthesis_errors: usize,
    pub stream_frames_dropped: usize,
}

pub(crate) fn bump(counter: &AtomicUsize, by: usize) {
    counter.fetch_add(by, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_zeroes_every_counter() {
        let diag = PlaybackDiagnostics::default();
        for counter in diag.counters() {
            bump(counter, 3);
        }
        assert_eq!(diag.snapshot().underruns, 3);
        diag.reset();
        assert_eq!(diag.snapshot(), DiagnosticsSnapshot::default());
    }

    #[test]
    fn control_flush_generation_is_monotonic() {
        let control = PlaybackControl::default();
        let g = control.flush_generation();
        control.request_flush();
        control.request_flush();
        assert_eq!(control.flush_generation(), g + 2);
        assert!(!control.is_shutdown());
        control.request_shutdown();
        assert!(control.is_shutdown());
        control.reset();
        assert!(!control.is_shutdown());
    }
}
