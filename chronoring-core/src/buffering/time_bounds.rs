//! Lock-free publication of the valid sample-time window.
//!
//! The writer never edits the live `[start, end)` pair in place. Each update
//! goes to the next slot of a small ring, stamped with the generation counter
//! that selects it, and only then is the counter advanced. A reader loads the
//! counter, reads the slot, and accepts the pair only if the slot's stamp still
//! equals that counter on both sides of the read. Otherwise the writer lapped
//! it mid-read, and it retries.

use std::sync::atomic::{fence, AtomicI64, AtomicU64, Ordering};

/// Number of slots in the queue.
pub const TIME_BOUNDS_QUEUE_SIZE: usize = 32;
const TIME_BOUNDS_QUEUE_MASK: u64 = (TIME_BOUNDS_QUEUE_SIZE as u64) - 1;

/// Attempts a reader makes before giving up on a snapshot.
pub const MAX_SNAPSHOT_ATTEMPTS: usize = 8;

/// Stamp held by a slot while the writer is rewriting it.
const WRITING: u64 = u64::MAX;

/// Half-open `[start, end)` range of sample times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TimeBounds {
    pub start: i64,
    pub end: i64,
}

impl TimeBounds {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Number of frames in the range.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start).max(0) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, time: i64) -> bool {
        self.start <= time && time < self.end
    }

    /// Overlap of two ranges, `None` when they share no frame.
    pub fn intersect(&self, other: TimeBounds) -> Option<TimeBounds> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(TimeBounds { start, end })
    }
}

struct Slot {
    start: AtomicI64,
    end: AtomicI64,
    /// Counter value this slot was last written for.
    sequence: AtomicU64,
}

impl Slot {
    fn zeroed() -> Self {
        Self {
            start: AtomicI64::new(0),
            end: AtomicI64::new(0),
            sequence: AtomicU64::new(0),
        }
    }
}

pub(crate) struct TimeBoundsQueue {
    slots: [Slot; TIME_BOUNDS_QUEUE_SIZE],
    counter: AtomicU64,
}

impl TimeBoundsQueue {
    pub(crate) fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Slot::zeroed()),
            counter: AtomicU64::new(0),
        }
    }

    /// Back to `[0, 0)` at generation 0. Requires exclusive access.
    pub(crate) fn reset(&mut self) {
        for slot in &mut self.slots {
            *slot.start.get_mut() = 0;
            *slot.end.get_mut() = 0;
            *slot.sequence.get_mut() = 0;
        }
        *self.counter.get_mut() = 0;
    }

    fn slot(&self, generation: u64) -> &Slot {
        &self.slots[(generation & TIME_BOUNDS_QUEUE_MASK) as usize]
    }

    /// Generation of the most recent publication.
    pub(crate) fn generation(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// The current bounds as seen by the writer, who is their only author.
    pub(crate) fn current(&self) -> TimeBounds {
        let slot = self.slot(self.counter.load(Ordering::Relaxed));
        TimeBounds {
            start: slot.start.load(Ordering::Relaxed),
            end: slot.end.load(Ordering::Relaxed),
        }
    }

    /// Publishes new bounds. Writer only.
    ///
    /// Storage writes issued after this call are ordered after the new
    /// counter value.
    pub(crate) fn publish(&self, bounds: TimeBounds) {
        let next = self.counter.load(Ordering::Relaxed).wrapping_add(1);
        let slot = self.slot(next);

        slot.sequence.swap(WRITING, Ordering::Acquire);
        fence(Ordering::Release);
        slot.start.store(bounds.start, Ordering::Relaxed);
        slot.end.store(bounds.end, Ordering::Relaxed);
        slot.sequence.store(next, Ordering::Release);

        self.counter.swap(next, Ordering::AcqRel);
    }

    /// Reader-side snapshot. Returns the bounds and the number of retries it
    /// took, or `None` once [`MAX_SNAPSHOT_ATTEMPTS`] are exhausted.
    pub(crate) fn snapshot(&self) -> Option<(TimeBounds, usize)> {
        for attempt in 0..MAX_SNAPSHOT_ATTEMPTS {
            let generation = self.counter.load(Ordering::Acquire);
            let slot = self.slot(generation);

            if slot.sequence.load(Ordering::Acquire) == generation {
                let start = slot.start.load(Ordering::Relaxed);
                let end = slot.end.load(Ordering::Relaxed);
                fence(Ordering::Acquire);
                if slot.sequence.load(Ordering::Relaxed) == generation {
                    return Some((TimeBounds { start, end }, attempt));
                }
            }

            std::hint::spin_loop();
        }
        None
    }
}
