//! Lock-free counters describing how an audio ring buffer has been used.
//!
//! Updated with relaxed atomics from the reader and writer threads; safe to
//! snapshot from any thread at any time.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct RingDiagnostics {
    pub frames_written: AtomicU64,
    pub frames_read: AtomicU64,
    /// Frames of silence stored to bridge forward gaps between writes.
    pub gap_frames_filled: AtomicU64,
    /// Destination frames zero-filled because they were outside the window.
    pub silence_frames_read: AtomicU64,
    /// Writes that discarded the whole buffered history.
    pub discontinuities: AtomicU64,
    pub snapshot_retries: AtomicU64,
    /// Reads that found no overlap with the buffered window.
    pub read_misses: AtomicU64,
    /// Frames a concurrent write evicted while they were being read.
    pub overrun_frames: AtomicU64,
}

impl RingDiagnostics {
    #[inline]
    pub(crate) fn add(counter: &AtomicU64, value: u64) {
        if value != 0 {
            counter.fetch_add(value, Ordering::Relaxed);
        }
    }

    pub fn reset(&self) {
        self.frames_written.store(0, Ordering::Relaxed);
        self.frames_read.store(0, Ordering::Relaxed);
        self.gap_frames_filled.store(0, Ordering::Relaxed);
        self.silence_frames_read.store(0, Ordering::Relaxed);
        self.discontinuities.store(0, Ordering::Relaxed);
        self.snapshot_retries.store(0, Ordering::Relaxed);
        self.read_misses.store(0, Ordering::Relaxed);
        self.overrun_frames.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_written: self.frames_written.load(Ordering::Relaxed),
            frames_read: self.frames_read.load(Ordering::Relaxed),
            gap_frames_filled: self.gap_frames_filled.load(Ordering::Relaxed),
            silence_frames_read: self.silence_frames_read.load(Ordering::Relaxed),
            discontinuities: self.discontinuities.load(Ordering::Relaxed),
            snapshot_retries: self.snapshot_retries.load(Ordering::Relaxed),
            read_misses: self.read_misses.load(Ordering::Relaxed),
            overrun_frames: self.overrun_frames.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_written: u64,
    pub frames_read: u64,
    pub gap_frames_filled: u64,
    pub silence_frames_read: u64,
    pub discontinuities: u64,
    pub snapshot_retries: u64,
    pub read_misses: u64,
    pub overrun_frames: u64,
}
