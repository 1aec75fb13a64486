//! Playback callback over the item queue.
//!
//! ## Per block
//!
//! ```text
//! 1. shutdown requested?   → silence, discard current item, Complete
//! 2. queue cleared (stop)? → discard current item
//! 3. idle?                 → try_begin_head (try-lock; contention = silent block)
//! 4. copy min(remaining, block) frames, zero the rest
//! 5. drained?              → Exhausted, retire, free the playing slot
//! ```
//!
//! Exhausted items leave through the queue's retirement channel so they are
//! freed on the reclaimer thread. If that channel is full the item is parked in
//! a pre-allocated slot list and retried on the next block.

use std::sync::Arc;

use crate::buffering::{AudioItem, AudioItemQueue, HeadOutcome, ItemId};

use super::{bump, FrameSource, PlaybackControl, PlaybackDiagnostics, StreamFlow};

/// Exhausted items held back while the retirement channel is full.
const PARK_SLOTS: usize = 4;

pub struct QueuePlayback {
    queue: Arc<AudioItemQueue>,
    control: Arc<PlaybackControl>,
    diagnostics: Arc<PlaybackDiagnostics>,
    channels: u16,
    current: Option<AudioItem>,
    /// Frames of `current` already emitted.
    emitted: usize,
    /// Playing slot that still has to be released (lock was contended).
    unfinished: Option<ItemId>,
    parked: Vec<AudioItem>,
    generation: u64,
}

impl QueuePlayback {
    pub fn new(
        queue: Arc<AudioItemQueue>,
        control: Arc<PlaybackControl>,
        diagnostics: Arc<PlaybackDiagnostics>,
        channels: u16,
    ) -> Self {
        let generation = queue.generation();
        Self {
            queue,
            control,
            diagnostics,
            channels: channels.max(1),
            current: None,
            emitted: 0,
            unfinished: None,
            parked: Vec::with_capacity(PARK_SLOTS),
            generation,
        }
    }

    /// Id of the item being played, if any.
    pub fn current_item(&self) -> Option<ItemId> {
        self.current.as_ref().map(AudioItem::id)
    }

    fn retire(&mut self, item: AudioItem) {
        if let Err(item) = self.queue.retire(item) {
            if self.parked.len() < PARK_SLOTS {
                self.parked.push(item);
            } else {
                // No reclaimer is draining; freeing here is the only option left.
                bump(&self.diagnostics.reclaim_overflow, 1);
                drop(item);
            }
        }
    }

    fn flush_parked(&mut self) {
        while !self.parked.is_empty() {
            let item = self.parked.remove(0);
            if let Err(item) = self.queue.retire(item) {
                self.parked.insert(0, item);
                break;
            }
        }
    }

    fn discard_current(&mut self) {
        if let Some(mut item) = self.current.take() {
            item.mark_exhausted();
            self.retire(item);
        }
        self.emitted = 0;
    }

    fn release_slot(&mut self) {
        if let Some(id) = self.unfinished {
            if self.queue.mark_head_exhausted(id) {
                self.unfinished = None;
            }
        }
    }

    /// Pull the next playable item. Zero-frame items are retired on the spot
    /// without emitting anything.
    fn start_next(&mut self) {
        loop {
            match self.queue.try_begin_head() {
                HeadOutcome::Started { item, generation } => {
                    self.generation = generation;
                    if item.channels() != self.channels {
                        // Worker always upmixes to the device layout; anything
                        // else cannot be copied frame-for-frame.
                        let id = item.id();
                        bump(&self.diagnostics.items_skipped, 1);
                        let mut item = item;
                        item.mark_exhausted();
                        self.retire(item);
                        self.unfinished = Some(id);
                        self.release_slot();
                        if self.unfinished.is_some() {
                            return;
                        }
                        continue;
                    }
                    bump(&self.diagnostics.items_started, 1);
                    self.emitted = 0;
                    self.current = Some(item);
                    return;
                }
                HeadOutcome::Skipped(item) => {
                    bump(&self.diagnostics.items_skipped, 1);
                    self.retire(item);
                }
                HeadOutcome::Empty => return,
                HeadOutcome::Contended => {
                    bump(&self.diagnostics.underruns, 1);
                    return;
                }
            }
        }
    }
}

impl FrameSource for QueuePlayback {
    fn render(&mut self, out: &mut [f32]) -> StreamFlow {
        bump(&self.diagnostics.blocks_rendered, 1);

        if self.control.is_shutdown() {
            out.fill(0.0);
            self.discard_current();
            self.flush_parked();
            return StreamFlow::Complete;
        }

        self.flush_parked();

        let generation = self.queue.generation();
        if generation != self.generation {
            // stop() already emptied the queue and freed the playing slot.
            self.generation = generation;
            self.unfinished = None;
            self.discard_current();
        }

        self.release_slot();

        if self.current.is_none() && self.unfinished.is_none() {
            self.start_next();
        }

        let ch = self.channels as usize;
        let written = match self.current.as_mut() {
            Some(item) => item.copy_frames(out),
            None => 0,
        };
        out[written * ch..].fill(0.0);

        if written == 0 {
            bump(&self.diagnostics.silent_blocks, 1);
        } else {
            bump(&self.diagnostics.frames_emitted, written);
            self.emitted += written;
            self.queue.report_progress(self.emitted);
        }

        let drained = self.current.as_ref().is_some_and(AudioItem::is_drained);
        if drained {
            if let Some(mut item) = self.current.take() {
                item.mark_exhausted();
                bump(&self.diagnostics.items_finished, 1);
                self.unfinished = Some(item.id());
                self.emitted = 0;
                self.retire(item);
                self.release_slot();
            }
        }

        StreamFlow::Continue
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}
