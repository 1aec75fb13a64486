//! Lock-free SPSC sample store for the continuous-stream playback mode.
//!
//! Backed by `ringbuf::HeapRb<f32>`, whose `push_slice` / `pop_slice` are
//! wait-free and allocation-free, so the reader half is safe on the device
//! thread. The store is frame granular: the writer only ever pushes whole
//! interleaved frames, so the reader never sees a torn frame.
//!
//! ## Capacity
//!
//! `capacity_frames` slots are requested and one is reserved, so at most
//! `capacity_frames - 1` frames are buffered. Read cursor == write cursor
//! therefore always means empty.
//!
//! ## Overflow policy
//!
//! `write` never blocks and reports how many frames fit. `write_blocking`
//! (producer side only) retries until the timeout and then drops the rest
//! with a warning, or gives up early when its caller says so. The reader
//! never moves its cursor to make room.

use std::time::{Duration, Instant};

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use tracing::{debug, warn};

/// Poll interval while the producer waits for the device to drain the ring.
const WRITE_RETRY_SLEEP: Duration = Duration::from_millis(5);

/// Producer half — owned by the synthesis side.
pub struct RingWriter {
    prod: HeapProd<f32>,
    channels: usize,
    capacity_frames: usize,
}

/// Consumer half — moved into the device callback.
pub struct RingReader {
    cons: HeapCons<f32>,
    channels: usize,
    capacity_frames: usize,
}

/// Allocate a store of `capacity_frames` slots (one reserved) of `channels`
/// interleaved samples each and split it into its two halves.
///
/// `capacity_frames` is raised to 2 so at least one frame can be buffered.
pub fn ring_store(capacity_frames: usize, channels: u16) -> (RingWriter, RingReader) {
    let capacity_frames = capacity_frames.max(2);
    let channels = channels.max(1) as usize;
    let (prod, cons) = HeapRb::<f32>::new((capacity_frames - 1) * channels).split();
    (
        RingWriter {
            prod,
            channels,
            capacity_frames,
        },
        RingReader {
            cons,
            channels,
            capacity_frames,
        },
    )
}

impl RingWriter {
    /// Push as many whole frames from `samples` as fit. Returns frames accepted;
    /// fewer than offered means the ring is full (backpressure).
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let offered = samples.len() / self.channels;
        let frames = offered.min(self.vacant_frames());
        let pushed = self.prod.push_slice(&samples[..frames * self.channels]);
        pushed / self.channels
    }

    /// Write everything, waiting for space up to `timeout`. Whatever still
    /// does not fit at the deadline is dropped and logged.
    ///
    /// `keep_writing` is polled before every push; once it returns `false`
    /// the rest is abandoned without a warning (playback stopped or is
    /// shutting down).
    pub fn write_blocking(
        &mut self,
        samples: &[f32],
        timeout: Duration,
        keep_writing: impl Fn() -> bool,
    ) -> usize {
        let total = samples.len() / self.channels;
        let deadline = Instant::now() + timeout;
        let mut written = 0usize;

        while written < total {
            if !keep_writing() {
                debug!(
                    abandoned_frames = total - written,
                    written_frames = written,
                    "sample ring write abandoned"
                );
                break;
            }
            written += self.write(&samples[written * self.channels..]);
            if written == total {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    dropped_frames = total - written,
                    written_frames = written,
                    "sample ring full: dropping remainder"
                );
                break;
            }
            std::thread::sleep(WRITE_RETRY_SLEEP);
        }
        written
    }

    pub fn vacant_frames(&self) -> usize {
        self.prod.vacant_len() / self.channels
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

impl RingReader {
    /// Copy available frames into `out` (length in samples). Returns frames
    /// produced; the caller fills whatever is left.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        let wanted = out.len() / self.channels;
        let frames = wanted.min(self.occupied_frames());
        let popped = self.cons.pop_slice(&mut out[..frames * self.channels]);
        popped / self.channels
    }

    /// Discard every unread frame. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        self.cons.clear() / self.channels
    }

    pub fn occupied_frames(&self) -> usize {
        self.cons.occupied_len() / self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.cons.is_empty()
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}
