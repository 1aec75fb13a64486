//! Buffering between the synthesis producer and the device callback.
//!
//! Two strategies share the same item type:
//! - [`queue::AudioItemQueue`]: whole utterances, FIFO, rejects when full.
//! - [`ring::ring_store`]: a continuous SPSC sample ring for streaming output.

pub mod item;
pub mod queue;
pub mod ring;

pub use item::{AudioItem, AudioItemView, ItemId, ItemState};
pub use queue::{AudioItemQueue, HeadOutcome, DEFAULT_QUEUE_CAPACITY};
pub use ring::{ring_store, RingReader, RingWriter};

/// Default ring size: 2^16 frames ≈ 5.9 s at 11 025 Hz.
pub const DEFAULT_RING_FRAMES: usize = 1 << 16;
