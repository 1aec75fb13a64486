//! Bounded FIFO of synthesized audio items.
//!
//! ## Lock discipline
//!
//! One `parking_lot::Mutex` guards the queue metadata. Producers take it with a
//! plain `lock()` and may wait on the paired `Condvar`. The device callback only
//! ever uses `try_lock` with a bounded spin and emits silence when it loses the
//! race; a dropped block is cheaper than a missed deadline.
//!
//! ## Item ownership
//!
//! ```text
//! producer ──try_enqueue──► pending (VecDeque, pre-allocated)
//!                              │ try_begin_head (callback)
//!                              ▼
//!                    callback-owned, `playing` slot set
//!                              │ exhausted → retire (try_send, no drop)
//!                              ▼
//!                    retired channel ──reclaim──► dropped on a non-RT thread
//! ```
//!
//! The playing item still counts toward capacity until the callback clears the
//! slot with `mark_head_exhausted`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::debug;

use super::item::{AudioItem, AudioItemView, ItemId, ItemState};

/// Default number of items (pending + playing) the queue holds.
pub const DEFAULT_QUEUE_CAPACITY: usize = 5;

/// How many `try_lock` attempts the callback makes before giving up.
const TRY_LOCK_SPINS: usize = 8;

/// Upper bound on a single condvar wait so waiters re-check state even when a
/// notification is missed (the callback never notifies).
const WAIT_SLICE: Duration = Duration::from_millis(10);

struct QueueState {
    pending: VecDeque<AudioItem>,
    playing: Option<PlayingSlot>,
}

#[derive(Clone, Copy)]
struct PlayingSlot {
    id: ItemId,
    frame_count: usize,
    channels: u16,
}

impl QueueState {
    fn len(&self) -> usize {
        self.pending.len() + usize::from(self.playing.is_some())
    }
}

/// Result of the callback asking for the next item.
#[derive(Debug)]
pub enum HeadOutcome {
    /// Head moved to the callback and marked Playing. `generation` is the
    /// clear-generation observed while the lock was held.
    Started { item: AudioItem, generation: u64 },
    /// Head had no frames; it is already Exhausted and must be retired.
    Skipped(AudioItem),
    /// Nothing ready.
    Empty,
    /// Lock was held by a producer; emit silence this block.
    Contended,
}

pub struct AudioItemQueue {
    state: Mutex<QueueState>,
    changed: Condvar,
    capacity: usize,
    /// Bumped by `clear`; the callback drops its current item when it changes.
    generation: AtomicU64,
    /// Frames of the playing item already emitted (written by the callback).
    head_progress: AtomicUsize,
    next_id: AtomicU64,
    retired_tx: Sender<AudioItem>,
    retired_rx: Receiver<AudioItem>,
}

impl AudioItemQueue {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (retired_tx, retired_rx) = crossbeam_channel::bounded(capacity * 2 + 2);
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::with_capacity(capacity),
                playing: None,
            }),
            changed: Condvar::new(),
            capacity,
            generation: AtomicU64::new(0),
            head_progress: AtomicUsize::new(0),
            next_id: AtomicU64::new(0),
            retired_tx,
            retired_rx,
        }
    }

    /// Allocate the next submission tag.
    pub fn next_item_id(&self) -> ItemId {
        ItemId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pending plus playing.
    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    // ── Producer side ────────────────────────────────────────────────────────

    /// Append a Processed item at the tail. On a full queue the item is handed
    /// back untouched and the queue is unchanged.
    pub fn try_enqueue(&self, item: AudioItem) -> Result<ItemId, AudioItem> {
        debug_assert_eq!(item.state(), ItemState::Processed);
        let mut st = self.state.lock();
        if st.len() >= self.capacity {
            return Err(item);
        }
        let id = item.id();
        st.pending.push_back(item);
        drop(st);
        self.changed.notify_all();
        Ok(id)
    }

    /// Like `try_enqueue`, but waits up to `timeout` for a slot to free up.
    pub fn enqueue_timeout(&self, item: AudioItem, timeout: Duration) -> Result<ItemId, AudioItem> {
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock();
        while st.len() >= self.capacity {
            let now = Instant::now();
            if now >= deadline {
                return Err(item);
            }
            self.changed
                .wait_for(&mut st, (deadline - now).min(WAIT_SLICE));
        }
        let id = item.id();
        st.pending.push_back(item);
        drop(st);
        self.changed.notify_all();
        Ok(id)
    }

    /// Read-only view of the logical head: the playing item if any, otherwise
    /// the oldest pending one.
    pub fn peek_head(&self) -> Option<AudioItemView> {
        let st = self.state.lock();
        if let Some(slot) = st.playing {
            let emitted = self.head_progress.load(Ordering::Relaxed).min(slot.frame_count);
            return Some(AudioItemView {
                id: slot.id,
                state: ItemState::Playing,
                frame_count: slot.frame_count,
                remaining_frames: slot.frame_count - emitted,
                channels: slot.channels,
            });
        }
        st.pending.front().map(AudioItem::view)
    }

    /// Drop every pending item and forget the playing one. Returns how many
    /// items were discarded. Calling it on an empty queue is a no-op apart
    /// from the generation bump.
    pub fn clear(&self) -> usize {
        let mut st = self.state.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        let discarded = st.len();
        st.pending.clear();
        st.playing = None;
        drop(st);
        self.changed.notify_all();
        if discarded > 0 {
            debug!(discarded, "audio queue cleared");
        }
        discarded
    }

    /// Drop everything the callback has retired and wake waiters.
    /// Returns the ids that were reclaimed, oldest first.
    pub fn reclaim(&self) -> Vec<ItemId> {
        let mut ids = Vec::new();
        loop {
            match self.retired_rx.try_recv() {
                Ok(item) => ids.push(item.id()),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        if !ids.is_empty() {
            self.changed.notify_all();
        }
        ids
    }

    /// Block up to `timeout` for one retired item, drop it, wake waiters.
    pub fn reclaim_one(&self, timeout: Duration) -> Option<ItemId> {
        let item = self.retired_rx.recv_timeout(timeout).ok()?;
        let id = item.id();
        drop(item);
        self.changed.notify_all();
        Some(id)
    }

    /// Wait until at least one slot is free. Returns `false` on timeout.
    pub fn wait_for_space(&self, timeout: Duration) -> bool {
        self.wait_while(timeout, |st, cap| st.len() >= cap)
    }

    /// Wait until nothing is pending or playing. Returns `false` on timeout.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.wait_while(timeout, |st, _| st.len() > 0)
    }

    fn wait_while(&self, timeout: Duration, busy: impl Fn(&QueueState, usize) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock();
        while busy(&*st, self.capacity) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.changed
                .wait_for(&mut st, (deadline - now).min(WAIT_SLICE));
        }
        true
    }

    // ── Consumer (real-time) side ────────────────────────────────────────────

    fn try_lock_bounded(&self) -> Option<MutexGuard<'_, QueueState>> {
        for _ in 0..TRY_LOCK_SPINS {
            if let Some(guard) = self.state.try_lock() {
                return Some(guard);
            }
            std::hint::spin_loop();
        }
        None
    }

    /// Hand the Processed head to the callback. Never blocks, never allocates.
    pub fn try_begin_head(&self) -> HeadOutcome {
        let Some(mut st) = self.try_lock_bounded() else {
            return HeadOutcome::Contended;
        };
        if st.playing.is_some() {
            // Previous head not yet marked exhausted; nothing new may start.
            return HeadOutcome::Empty;
        }
        match st.pending.front().map(AudioItem::state) {
            Some(ItemState::Processed) => {}
            _ => return HeadOutcome::Empty,
        }
        let Some(mut item) = st.pending.pop_front() else {
            return HeadOutcome::Empty;
        };
        if item.frame_count() == 0 {
            item.mark_exhausted();
            return HeadOutcome::Skipped(item);
        }
        item.begin_playing();
        self.head_progress.store(0, Ordering::Relaxed);
        st.playing = Some(PlayingSlot {
            id: item.id(),
            frame_count: item.frame_count(),
            channels: item.channels(),
        });
        HeadOutcome::Started {
            item,
            generation: self.generation.load(Ordering::Acquire),
        }
    }

    /// Record emitted frames of the playing item for `peek_head`.
    pub(crate) fn report_progress(&self, frames_emitted: usize) {
        self.head_progress.store(frames_emitted, Ordering::Relaxed);
    }

    /// Free the playing slot held by `id`. O(1). Returns `false` on lock
    /// contention; the callback retries on its next block.
    pub fn mark_head_exhausted(&self, id: ItemId) -> bool {
        let Some(mut st) = self.try_lock_bounded() else {
            return false;
        };
        if st.playing.map(|slot| slot.id) == Some(id) {
            st.playing = None;
        }
        true
    }

    /// Move an exhausted item onto the retirement channel without dropping it.
    /// Hands the item back when the channel is full.
    pub fn retire(&self, item: AudioItem) -> Result<(), AudioItem> {
        self.retired_tx.try_send(item).map_err(|e| e.into_inner())
    }
}

impl std::fmt::Debug for AudioItemQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioItemQueue")
            .field("capacity", &self.capacity)
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}
