//! Typed audio item passed from the synthesis worker to the playback callback.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Monotonic tag taken when an item is packaged. Playback order is queue
/// order: with several producers, a lower id may still be enqueued later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item-{}", self.0)
    }
}

/// Where an item is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    /// Raw synthesis output, not yet post-processed.
    Pending,
    /// Post-processed and immutable; eligible for playback.
    Processed,
    /// Owned by the playback callback, being copied to the device.
    Playing,
    /// Every frame emitted (or discarded by stop); waiting for reclamation.
    Exhausted,
}

/// A block of interleaved f32 PCM plus the read cursor the callback advances.
///
/// Allocated on a producer thread, deallocated on the reclaimer thread. The
/// real-time callback only ever moves it.
#[derive(Debug)]
pub struct AudioItem {
    id: ItemId,
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
    frame_count: usize,
    cursor: usize,
    state: ItemState,
}

impl AudioItem {
    /// Wrap interleaved samples. Trailing samples that do not make up a whole
    /// frame are discarded.
    pub fn new(id: ItemId, mut samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        let ch = channels.max(1) as usize;
        let frame_count = samples.len() / ch;
        samples.truncate(frame_count * ch);
        Self {
            id,
            samples,
            channels: channels.max(1),
            sample_rate,
            frame_count,
            cursor: 0,
            state: ItemState::Pending,
        }
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Frames not yet copied out.
    pub fn remaining_frames(&self) -> usize {
        self.frame_count - self.cursor
    }

    pub fn duration_secs(&self) -> f64 {
        self.frame_count as f64 / self.sample_rate.max(1) as f64
    }

    /// Freeze the samples. Only valid from `Pending`.
    pub fn mark_processed(&mut self) {
        debug_assert_eq!(self.state, ItemState::Pending);
        self.state = ItemState::Processed;
    }

    pub(crate) fn begin_playing(&mut self) {
        self.cursor = 0;
        self.state = ItemState::Playing;
    }

    pub(crate) fn mark_exhausted(&mut self) {
        self.cursor = self.frame_count;
        self.state = ItemState::Exhausted;
    }

    /// Copy up to `out.len() / channels` frames starting at the cursor and
    /// advance it. Returns the number of frames written; `out` beyond that is
    /// left untouched.
    pub(crate) fn copy_frames(&mut self, out: &mut [f32]) -> usize {
        let ch = self.channels as usize;
        let frames = (out.len() / ch).min(self.remaining_frames());
        let start = self.cursor * ch;
        let end = start + frames * ch;
        out[..frames * ch].copy_from_slice(&self.samples[start..end]);
        self.cursor += frames;
        frames
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.cursor >= self.frame_count
    }

    pub fn view(&self) -> AudioItemView {
        AudioItemView {
            id: self.id,
            state: self.state,
            frame_count: self.frame_count,
            remaining_frames: self.remaining_frames(),
            channels: self.channels,
        }
    }
}

/// Read-only snapshot of an item's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioItemView {
    pub id: ItemId,
    pub state: ItemState,
    pub frame_count: usize,
    pub remaining_frames: usize,
    pub channels: u16,
}
