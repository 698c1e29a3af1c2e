//! Timestamp-addressed SPSC ring buffer for deinterleaved audio.
//!
//! ## Addressing
//!
//! Audio is addressed by absolute 64-bit sample time. Frame `n` of every
//! channel stream lives at byte offset `(n & (capacity - 1)) * bytes_per_frame`
//! of that stream's region, so all streams wrap at the same point.
//!
//! ## Writes
//!
//! ```text
//!  startTime < StartTime, or gap >= capacity  → history discarded, fresh window
//!  StartTime <= startTime < EndTime           → overlap overwritten in place
//!  EndTime < startTime (gap < capacity)       → gap stored as silence
//! ```
//!
//! The window never grows past `capacity` frames: the oldest frames are
//! evicted, and the shrunken window is published before their storage is
//! reused.
//!
//! ## Reads
//!
//! The requested range is intersected with a lock-free snapshot of the window.
//! Requested frames outside the window come back as silence. A request with no
//! overlap at all is reported as [`ChronoringError::OutOfBounds`], after the
//! destination has been silenced.
//!
//! After copying, the reader takes a second snapshot. Copied frames that
//! left the window in the meantime, or that were copied across a rebase
//! (a write that discarded the history), are silenced again before the
//! range is returned.
//!
//! Neither side blocks or allocates after [`AudioRingBuffer::allocate`].

use std::ops::Deref;
use std::sync::{
    atomic::{fence, AtomicU64, Ordering},
    Arc,
};

use tracing::{debug, info, trace, warn};

use super::block::{AudioBlock, AudioBlockMut};
use super::storage::ChannelStorage;
use super::time_bounds::{TimeBounds, TimeBoundsQueue, MAX_SNAPSHOT_ATTEMPTS};
use crate::config::RingConfig;
use crate::diagnostics::RingDiagnostics;
use crate::error::{ChronoringError, Result};
use crate::format::AudioFormat;

/// Smallest supported capacity, in frames.
pub const MIN_CAPACITY_FRAMES: usize = 2;
/// Largest supported capacity, in frames (2^31).
pub const MAX_CAPACITY_FRAMES: usize = 1 << 31;

pub struct AudioRingBuffer {
    format: AudioFormat,
    storage: Option<ChannelStorage>,
    bytes_per_frame: usize,
    capacity_frames: usize,
    /// `capacity_frames - 1`
    capacity_frames_mask: i64,
    time_bounds: TimeBoundsQueue,
    /// Bumped after every write that discards the buffered history.
    rebases: AtomicU64,
    diagnostics: RingDiagnostics,
}

// Safety: storage is mutated only through `&mut self` or by the single writer
// handle. The writer publishes every window change before reusing storage the
// reader may address, and the reader only copies frames inside a published
// window, re-validating it afterwards.
unsafe impl Sync for AudioRingBuffer {}

impl AudioRingBuffer {
    /// Creates an empty, unallocated buffer.
    pub fn new() -> Self {
        Self {
            format: AudioFormat::default(),
            storage: None,
            bytes_per_frame: 0,
            capacity_frames: 0,
            capacity_frames_mask: 0,
            time_bounds: TimeBoundsQueue::new(),
            rebases: AtomicU64::new(0),
            diagnostics: RingDiagnostics::default(),
        }
    }

    /// Creates and allocates a buffer in one step.
    pub fn with_capacity(format: AudioFormat, capacity_frames: usize) -> Result<Self> {
        let mut ring = Self::new();
        ring.allocate(format, capacity_frames)?;
        Ok(ring)
    }

    /// Allocates a buffer described by `config`.
    pub fn from_config(config: &RingConfig) -> Result<Self> {
        Self::with_capacity(config.format, config.capacity_frames)
    }

    /// Allocates storage for `capacity_frames` frames of `format`.
    ///
    /// `capacity_frames` must be a power of two in
    /// [`MIN_CAPACITY_FRAMES`]..=[`MAX_CAPACITY_FRAMES`]. Any previous
    /// allocation is released first; on failure the buffer is left
    /// unallocated. A fresh allocation holds the empty window `[0, 0)`.
    pub fn allocate(&mut self, format: AudioFormat, capacity_frames: usize) -> Result<()> {
        self.deallocate();

        if !capacity_frames.is_power_of_two()
            || !(MIN_CAPACITY_FRAMES..=MAX_CAPACITY_FRAMES).contains(&capacity_frames)
        {
            warn!(capacity_frames, "rejected audio ring capacity");
            return Err(ChronoringError::InvalidCapacity {
                requested: capacity_frames,
            });
        }

        if let Err(e) = format.validate() {
            warn!(format = %format, "rejected audio ring format: {e}");
            return Err(e);
        }

        let bytes_per_frame = format.bytes_per_frame() as usize;
        let stream_count = format.channel_stream_count() as usize;
        let stream_bytes = capacity_frames
            .checked_mul(bytes_per_frame)
            .ok_or(ChronoringError::AllocationFailed { bytes: usize::MAX })?;

        let storage = match ChannelStorage::try_new(stream_count, stream_bytes) {
            Ok(storage) => storage,
            Err(e) => {
                warn!(capacity_frames, stream_count, stream_bytes, "audio ring allocation failed");
                return Err(e);
            }
        };

        self.format = format;
        self.storage = Some(storage);
        self.bytes_per_frame = bytes_per_frame;
        self.capacity_frames = capacity_frames;
        self.capacity_frames_mask = capacity_frames as i64 - 1;
        self.time_bounds.reset();
        self.diagnostics.reset();

        info!(
            capacity_frames,
            bytes_per_frame,
            channel_streams = stream_count,
            format = %format,
            "allocated audio ring buffer"
        );
        Ok(())
    }

    /// Releases the storage. The buffer can be allocated again afterwards.
    pub fn deallocate(&mut self) {
        if let Some(storage) = self.storage.take() {
            debug!(
                total_bytes = storage.total_bytes(),
                "deallocated audio ring buffer"
            );
        }
        self.format = AudioFormat::default();
        self.bytes_per_frame = 0;
        self.capacity_frames = 0;
        self.capacity_frames_mask = 0;
        self.time_bounds.reset();
    }

    /// Empties the window and silences the storage without reallocating.
    pub fn reset(&mut self) {
        if let Some(storage) = self.storage.as_mut() {
            storage.clear();
        }
        self.time_bounds.reset();
    }

    pub fn is_allocated(&self) -> bool {
        self.storage.is_some()
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    /// Format captured at allocation time.
    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn diagnostics(&self) -> &RingDiagnostics {
        &self.diagnostics
    }

    /// Byte offset of absolute frame `frame` within each channel stream.
    #[inline]
    pub fn frame_byte_offset(&self, frame: i64) -> usize {
        (frame & self.capacity_frames_mask) as usize * self.bytes_per_frame
    }

    /// Lock-free snapshot of the valid `[start, end)` window.
    pub fn get_time_bounds(&self) -> Result<TimeBounds> {
        if self.storage.is_none() {
            return Err(ChronoringError::NotAllocated);
        }
        match self.time_bounds.snapshot() {
            Some((bounds, retries)) => {
                RingDiagnostics::add(&self.diagnostics.snapshot_retries, retries as u64);
                Ok(bounds)
            }
            None => {
                RingDiagnostics::add(
                    &self.diagnostics.snapshot_retries,
                    MAX_SNAPSHOT_ATTEMPTS as u64,
                );
                Err(ChronoringError::TimeBoundsUnavailable)
            }
        }
    }

    /// Intersects `[start_read, end_read)` with the valid window.
    ///
    /// Fails with [`ChronoringError::OutOfBounds`] when the two share no frame.
    pub fn clamp_times_to_bounds(&self, start_read: i64, end_read: i64) -> Result<TimeBounds> {
        let bounds = self.get_time_bounds()?;
        TimeBounds::new(start_read, end_read)
            .intersect(bounds)
            .ok_or(ChronoringError::OutOfBounds {
                start: start_read,
                end: end_read,
            })
    }

    /// Stores `frame_count` frames of every stream of `src` at `start_time`.
    ///
    /// Sample times should normally increase from one write to the next;
    /// see the module docs for overlaps and gaps.
    ///
    /// # Panics
    /// Panics if `src` has fewer streams than the format, or a stream shorter
    /// than `frame_count * bytes_per_frame`.
    pub fn write<B: AudioBlock + ?Sized>(
        &mut self,
        src: &B,
        frame_count: usize,
        start_time: i64,
    ) -> Result<()> {
        unsafe { self.write_shared(src, frame_count, start_time) }
    }

    /// Fills `dst` with `frame_count` frames starting at `start_time`.
    ///
    /// Returns the sub-range that came from buffered audio; every other
    /// destination frame is silence.
    ///
    /// # Panics
    /// Panics if `dst` has fewer streams than the format, or a stream shorter
    /// than `frame_count * bytes_per_frame`.
    pub fn read<B: AudioBlockMut + ?Sized>(
        &mut self,
        dst: &mut B,
        frame_count: usize,
        start_time: i64,
    ) -> Result<TimeBounds> {
        unsafe { self.read_shared(dst, frame_count, start_time) }
    }

    /// Splits into borrowed writer/reader handles for use on two threads.
    pub fn split(&mut self) -> (AudioRingWriter<&Self>, AudioRingReader<&Self>) {
        let ring: &Self = self;
        (AudioRingWriter { ring }, AudioRingReader { ring })
    }

    /// Splits into `Arc`-owned writer/reader handles.
    pub fn into_split(self) -> (AudioRingWriter<Arc<Self>>, AudioRingReader<Arc<Self>>) {
        let ring = Arc::new(self);
        (
            AudioRingWriter {
                ring: Arc::clone(&ring),
            },
            AudioRingReader { ring },
        )
    }

    /// # Safety
    /// Must only be called by the single writer.
    unsafe fn write_shared<B: AudioBlock + ?Sized>(
        &self,
        src: &B,
        frame_count: usize,
        start_write: i64,
    ) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Err(ChronoringError::NotAllocated);
        };
        if frame_count == 0 {
            return Ok(());
        }
        if frame_count > self.capacity_frames {
            return Err(ChronoringError::FrameCountExceedsCapacity {
                frames: frame_count,
                capacity: self.capacity_frames,
            });
        }

        let capacity = self.capacity_frames as i64;
        let end_write = start_write
            .checked_add(frame_count as i64)
            .ok_or(ChronoringError::TimeOverflow)?;

        let current = self.time_bounds.current();
        let TimeBounds { mut start, mut end } = current;

        if start_write < start || start_write.saturating_sub(end) >= capacity {
            if !current.is_empty() {
                RingDiagnostics::add(&self.diagnostics.discontinuities, 1);
                debug!(
                    start_write,
                    previous_start = start,
                    previous_end = end,
                    "discontinuous write, discarding buffered audio"
                );
            }
            start = start_write;
            end = start_write;
            self.time_bounds.publish(TimeBounds::new(start, end));
            // A reader still holding the old window sees the count change.
            self.rebases.fetch_add(1, Ordering::AcqRel);
        }

        let new_end = end.max(end_write);
        let new_start = start.max(new_end.saturating_sub(capacity));

        if new_start > start {
            // Evicting: readers must stop addressing those frames first.
            self.time_bounds
                .publish(TimeBounds::new(new_start, end.max(new_start)));
        }

        if start_write > end {
            let silence_from = end.max(new_start);
            let silent = (start_write - silence_from) as usize;
            trace!(from = silence_from, frames = silent, "filling write gap with silence");
            self.zero_frames(storage, silence_from, silent);
            RingDiagnostics::add(&self.diagnostics.gap_frames_filled, silent as u64);
        }

        self.store_frames(storage, src, start_write, frame_count);

        self.time_bounds.publish(TimeBounds::new(new_start, new_end));
        RingDiagnostics::add(&self.diagnostics.frames_written, frame_count as u64);
        Ok(())
    }

    /// # Safety
    /// Must only be called by the single reader.
    unsafe fn read_shared<B: AudioBlockMut + ?Sized>(
        &self,
        dst: &mut B,
        frame_count: usize,
        start_read: i64,
    ) -> Result<TimeBounds> {
        let Some(storage) = &self.storage else {
            return Err(ChronoringError::NotAllocated);
        };
        if frame_count == 0 {
            return Ok(TimeBounds::new(start_read, start_read));
        }

        let end_read = start_read
            .checked_add(frame_count as i64)
            .ok_or(ChronoringError::TimeOverflow)?;
        let streams = storage.stream_count();
        let bpf = self.bytes_per_frame;
        let total_bytes = frame_count * bpf;

        let rebases = self.rebases.load(Ordering::Acquire);
        let clamped = match self.clamp_times_to_bounds(start_read, end_read) {
            Ok(clamped) => clamped,
            Err(e) => {
                silence(dst, streams, 0, total_bytes);
                RingDiagnostics::add(&self.diagnostics.silence_frames_read, frame_count as u64);
                if matches!(e, ChronoringError::OutOfBounds { .. }) {
                    RingDiagnostics::add(&self.diagnostics.read_misses, 1);
                }
                return Err(e);
            }
        };

        let leading = (clamped.start - start_read) as usize;
        let copied = clamped.len() as usize;
        silence(dst, streams, 0, leading * bpf);
        silence(dst, streams, (leading + copied) * bpf, total_bytes);

        self.load_frames(storage, dst, leading * bpf, clamped.start, copied);

        // Anything evicted while we copied was published before it was
        // overwritten, so a fresh snapshot exposes it.
        fence(Ordering::Acquire);
        let rebased = self.rebases.load(Ordering::Relaxed) != rebases;
        let now = self.time_bounds.snapshot().map(|(now, _)| now);
        self.settle_read(dst, frame_count, start_read, clamped, rebased, now)
    }

    /// Silences the copied frames of `clamped` that are not in `now`, or all
    /// of them after a rebase or a failed snapshot, and accounts the read.
    fn settle_read<B: AudioBlockMut + ?Sized>(
        &self,
        dst: &mut B,
        frame_count: usize,
        start_read: i64,
        clamped: TimeBounds,
        rebased: bool,
        now: Option<TimeBounds>,
    ) -> Result<TimeBounds> {
        let streams = self.format.channel_stream_count() as usize;
        let bpf = self.bytes_per_frame;
        let kept = match now {
            Some(now) if !rebased => clamped.intersect(now),
            _ => None,
        }
        .unwrap_or(TimeBounds::new(clamped.start, clamped.start));

        let lost = clamped.len() - kept.len();
        if lost > 0 {
            let copied_from = (clamped.start - start_read) as usize;
            let copied_to = (clamped.end - start_read) as usize;
            let kept_from = (kept.start - start_read) as usize;
            let kept_to = (kept.end - start_read) as usize;
            silence(dst, streams, copied_from * bpf, kept_from * bpf);
            silence(dst, streams, kept_to * bpf, copied_to * bpf);
            RingDiagnostics::add(&self.diagnostics.overrun_frames, lost);
        }

        let delivered = kept.len();
        RingDiagnostics::add(&self.diagnostics.frames_read, delivered);
        RingDiagnostics::add(
            &self.diagnostics.silence_frames_read,
            frame_count as u64 - delivered,
        );

        if now.is_none() {
            RingDiagnostics::add(
                &self.diagnostics.snapshot_retries,
                MAX_SNAPSHOT_ATTEMPTS as u64,
            );
            return Err(ChronoringError::TimeBoundsUnavailable);
        }
        if kept.is_empty() {
            RingDiagnostics::add(&self.diagnostics.read_misses, 1);
            return Err(ChronoringError::OutOfBounds {
                start: start_read,
                end: start_read + frame_count as i64,
            });
        }
        Ok(kept)
    }

    /// Splits `frames` frames starting at `start` into at most two
    /// `(offset, len)` byte spans of a stream region.
    fn spans(&self, start: i64, frames: usize) -> ((usize, usize), (usize, usize)) {
        let bytes = frames * self.bytes_per_frame;
        let offset = self.frame_byte_offset(start);
        let first = bytes.min(self.capacity_frames * self.bytes_per_frame - offset);
        ((offset, first), (0, bytes - first))
    }

    unsafe fn store_frames<B: AudioBlock + ?Sized>(
        &self,
        storage: &ChannelStorage,
        src: &B,
        start: i64,
        frames: usize,
    ) {
        let ((offset, first), (_, second)) = self.spans(start, frames);
        for stream in 0..storage.stream_count() {
            let data = src.stream(stream);
            storage.store(stream, offset, &data[..first]);
            if second > 0 {
                storage.store(stream, 0, &data[first..first + second]);
            }
        }
    }

    unsafe fn zero_frames(&self, storage: &ChannelStorage, start: i64, frames: usize) {
        let ((offset, first), (_, second)) = self.spans(start, frames);
        for stream in 0..storage.stream_count() {
            storage.zero(stream, offset, first);
            if second > 0 {
                storage.zero(stream, 0, second);
            }
        }
    }

    unsafe fn load_frames<B: AudioBlockMut + ?Sized>(
        &self,
        storage: &ChannelStorage,
        dst: &mut B,
        dst_offset: usize,
        start: i64,
        frames: usize,
    ) {
        let ((offset, first), (_, second)) = self.spans(start, frames);
        for stream in 0..storage.stream_count() {
            let data = &mut dst.stream_mut(stream)[dst_offset..dst_offset + first + second];
            storage.load(stream, offset, &mut data[..first]);
            if second > 0 {
                storage.load(stream, 0, &mut data[first..]);
            }
        }
    }
}

fn silence<B: AudioBlockMut + ?Sized>(dst: &mut B, streams: usize, from: usize, to: usize) {
    if from >= to {
        return;
    }
    for stream in 0..streams {
        dst.stream_mut(stream)[from..to].fill(0);
    }
}

impl Default for AudioRingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AudioRingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioRingBuffer")
            .field("format", &self.format)
            .field("capacity_frames", &self.capacity_frames)
            .field("generation", &self.time_bounds.generation())
            .field("time_bounds", &self.time_bounds.snapshot().map(|(b, _)| b))
            .finish()
    }
}

/// Producer half of an [`AudioRingBuffer`].
pub struct AudioRingWriter<R: Deref<Target = AudioRingBuffer>> {
    ring: R,
}

impl<R: Deref<Target = AudioRingBuffer>> AudioRingWriter<R> {
    /// See [`AudioRingBuffer::write`].
    pub fn write<B: AudioBlock + ?Sized>(
        &mut self,
        src: &B,
        frame_count: usize,
        start_time: i64,
    ) -> Result<()> {
        // Safety: this handle is the only writer.
        unsafe { self.ring.write_shared(src, frame_count, start_time) }
    }

    /// First valid sample time, as last published by this writer.
    pub fn start_time(&self) -> i64 {
        self.ring.time_bounds.current().start
    }

    /// One past the last valid sample time, as last published by this writer.
    pub fn end_time(&self) -> i64 {
        self.ring.time_bounds.current().end
    }

    pub fn capacity_frames(&self) -> usize {
        self.ring.capacity_frames()
    }

    pub fn format(&self) -> &AudioFormat {
        self.ring.format()
    }

    pub fn diagnostics(&self) -> &RingDiagnostics {
        self.ring.diagnostics()
    }
}

/// Consumer half of an [`AudioRingBuffer`].
pub struct AudioRingReader<R: Deref<Target = AudioRingBuffer>> {
    ring: R,
}

impl<R: Deref<Target = AudioRingBuffer>> AudioRingReader<R> {
    /// See [`AudioRingBuffer::read`].
    pub fn read<B: AudioBlockMut + ?Sized>(
        &mut self,
        dst: &mut B,
        frame_count: usize,
        start_time: i64,
    ) -> Result<TimeBounds> {
        // Safety: this handle is the only reader.
        unsafe { self.ring.read_shared(dst, frame_count, start_time) }
    }

    pub fn get_time_bounds(&self) -> Result<TimeBounds> {
        self.ring.get_time_bounds()
    }

    pub fn clamp_times_to_bounds(&self, start_read: i64, end_read: i64) -> Result<TimeBounds> {
        self.ring.clamp_times_to_bounds(start_read, end_read)
    }

    pub fn capacity_frames(&self) -> usize {
        self.ring.capacity_frames()
    }

    pub fn format(&self) -> &AudioFormat {
        self.ring.format()
    }

    pub fn diagnostics(&self) -> &RingDiagnostics {
        self.ring.diagnostics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleFormat;
    use std::thread;

    /// Deinterleaved stereo, 4 bytes per frame.
    fn stereo() -> AudioFormat {
        AudioFormat::standard(48_000.0, 2)
    }

    /// Never zero, so stored audio is distinguishable from silence.
    fn sample(stream: usize, time: i64, tag: u8) -> [u8; 4] {
        let value = ((time as u32 & 0x00FF_FFFF) << 8) | ((stream as u32) << 4) | tag as u32;
        value.to_le_bytes()
    }

    fn block(streams: usize, start: i64, frames: usize, tag: u8) -> Vec<Vec<u8>> {
        (0..streams)
            .map(|s| (0..frames as i64).flat_map(|i| sample(s, start + i, tag)).collect())
            .collect()
    }

    fn empty(streams: usize, frames: usize) -> Vec<Vec<u8>> {
        vec![vec![0xEE; frames * 4]; streams]
    }

    fn frame(block: &[Vec<u8>], stream: usize, index: usize) -> [u8; 4] {
        block[stream][index * 4..index * 4 + 4].try_into().unwrap()
    }

    fn ring(capacity: usize) -> AudioRingBuffer {
        AudioRingBuffer::with_capacity(stereo(), capacity).unwrap()
    }

    #[test]
    fn every_power_of_two_capacity_allocates() {
        let mono = AudioFormat::new(SampleFormat::I8, 8_000.0, 1, false);
        for shift in 1..=20 {
            let capacity = 1usize << shift;
            let rb = AudioRingBuffer::with_capacity(mono, capacity).unwrap();
            assert_eq!(rb.capacity_frames(), capacity);
            assert_eq!(rb.get_time_bounds().unwrap(), TimeBounds::new(0, 0));
        }
    }

    #[test]
    fn invalid_capacity_leaves_buffer_unallocated() {
        let mut rb = ring(64);
        for bad in [0usize, 1, 3, 100, 1000, MAX_CAPACITY_FRAMES * 2] {
            let err = rb.allocate(stereo(), bad).unwrap_err();
            assert!(matches!(err, ChronoringError::InvalidCapacity { requested } if requested == bad));
            assert!(!rb.is_allocated());
            assert_eq!(rb.capacity_frames(), 0);
        }
    }

    #[test]
    fn invalid_format_is_rejected() {
        let err = AudioRingBuffer::with_capacity(AudioFormat::standard(48_000.0, 0), 64).unwrap_err();
        assert!(matches!(err, ChronoringError::InvalidFormat(_)));
    }

    #[test]
    fn unallocated_buffer_reports_not_allocated() {
        let mut rb = AudioRingBuffer::new();
        let src = block(2, 0, 4, 1);
        assert!(matches!(rb.write(&src, 4, 0), Err(ChronoringError::NotAllocated)));
        let mut dst = empty(2, 4);
        assert!(matches!(rb.read(&mut dst, 4, 0), Err(ChronoringError::NotAllocated)));
        assert!(matches!(rb.get_time_bounds(), Err(ChronoringError::NotAllocated)));
    }

    #[test]
    fn frame_offset_masks_absolute_time() {
        let rb = ring(64);
        assert_eq!(rb.frame_byte_offset(0), 0);
        assert_eq!(rb.frame_byte_offset(63), 63 * 4);
        assert_eq!(rb.frame_byte_offset(64), 0);
        assert_eq!(rb.frame_byte_offset(1_000_001), (1_000_001 % 64) * 4);
        assert_eq!(rb.frame_byte_offset(-1), 63 * 4);
    }

    #[test]
    fn round_trip_reproduces_written_bytes() {
        for (capacity, frames, start) in [(64, 64, 0), (64, 10, 60), (128, 100, 1_000_003), (8, 5, -3)] {
            let mut rb = ring(capacity);
            let src = block(2, start, frames, 1);
            rb.write(&src, frames, start).unwrap();

            let mut dst = empty(2, frames);
            let got = rb.read(&mut dst, frames, start).unwrap();
            assert_eq!(got, TimeBounds::new(start, start + frames as i64));
            assert_eq!(dst, src, "capacity={capacity} frames={frames} start={start}");
        }
    }

    #[test]
    fn zero_frame_operations_succeed_trivially() {
        let mut rb = ring(16);
        rb.write(&empty(2, 0), 0, 500).unwrap();
        assert_eq!(rb.get_time_bounds().unwrap(), TimeBounds::new(0, 0));
        let got = rb.read(&mut empty(2, 0), 0, 7).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn oversized_write_is_rejected() {
        let mut rb = ring(16);
        let err = rb.write(&block(2, 0, 17, 1), 17, 0).unwrap_err();
        assert!(matches!(
            err,
            ChronoringError::FrameCountExceedsCapacity { frames: 17, capacity: 16 }
        ));
    }

    #[test]
    fn forward_gap_reads_back_as_silence() {
        let mut rb = ring(256);
        rb.write(&block(2, 0, 100, 1), 100, 0).unwrap();
        rb.write(&block(2, 150, 50, 2), 50, 150).unwrap();
        assert_eq!(rb.get_time_bounds().unwrap(), TimeBounds::new(0, 200));

        let mut gap = empty(2, 50);
        rb.read(&mut gap, 50, 100).unwrap();
        assert!(gap.iter().all(|s| s.iter().all(|&b| b == 0)));

        let mut all = empty(2, 200);
        rb.read(&mut all, 200, 0).unwrap();
        for s in 0..2 {
            for i in 0..200usize {
                let expected = match i {
                    0..=99 => sample(s, i as i64, 1),
                    100..=149 => [0; 4],
                    _ => sample(s, i as i64, 2),
                };
                assert_eq!(frame(&all, s, i), expected, "stream {s} frame {i}");
            }
        }
        assert_eq!(rb.diagnostics().snapshot().gap_frames_filled, 50);
    }

    #[test]
    fn overlapping_write_wins() {
        let mut rb = ring(256);
        rb.write(&block(2, 0, 100, 1), 100, 0).unwrap();
        rb.write(&block(2, 50, 100, 2), 100, 50).unwrap();
        assert_eq!(rb.get_time_bounds().unwrap(), TimeBounds::new(0, 150));

        let mut dst = empty(2, 50);
        rb.read(&mut dst, 50, 50).unwrap();
        assert_eq!(dst, block(2, 50, 50, 2));

        let mut head = empty(2, 50);
        rb.read(&mut head, 50, 0).unwrap();
        assert_eq!(head, block(2, 0, 50, 1));
    }

    #[test]
    fn gap_beyond_capacity_discards_history() {
        let mut rb = ring(64);
        rb.write(&block(2, 0, 10, 1), 10, 0).unwrap();
        rb.write(&block(2, 1000, 10, 2), 10, 1000).unwrap();
        assert_eq!(rb.get_time_bounds().unwrap(), TimeBounds::new(1000, 1010));

        let mut dst = empty(2, 10);
        let err = rb.read(&mut dst, 10, 0).unwrap_err();
        assert!(matches!(err, ChronoringError::OutOfBounds { start: 0, end: 10 }));
        assert!(dst.iter().all(|s| s.iter().all(|&b| b == 0)));
        assert_eq!(rb.diagnostics().snapshot().discontinuities, 1);
    }

    #[test]
    fn gap_of_exactly_capacity_starts_fresh() {
        let mut rb = ring(64);
        rb.write(&block(2, 0, 10, 1), 10, 0).unwrap();
        rb.write(&block(2, 74, 4, 2), 4, 74).unwrap();
        assert_eq!(rb.get_time_bounds().unwrap(), TimeBounds::new(74, 78));
    }

    #[test]
    fn gap_just_under_capacity_is_silence_filled() {
        let mut rb = ring(64);
        rb.write(&block(2, 0, 10, 1), 10, 0).unwrap();
        rb.write(&block(2, 73, 4, 2), 4, 73).unwrap();
        let bounds = rb.get_time_bounds().unwrap();
        assert_eq!(bounds, TimeBounds::new(13, 77));

        let mut dst = empty(2, 64);
        rb.read(&mut dst, 64, 13).unwrap();
        for i in 0..60 {
            assert_eq!(frame(&dst, 0, i), [0; 4]);
        }
        assert_eq!(frame(&dst, 1, 60), sample(1, 73, 2));
    }

    #[test]
    fn write_before_window_starts_fresh() {
        let mut rb = ring(64);
        rb.write(&block(2, 100, 32, 1), 32, 100).unwrap();
        rb.write(&block(2, 40, 8, 2), 8, 40).unwrap();
        assert_eq!(rb.get_time_bounds().unwrap(), TimeBounds::new(40, 48));
    }

    #[test]
    fn writes_at_the_bottom_of_the_time_range() {
        let mut rb = ring(64);
        rb.write(&block(2, i64::MIN, 4, 1), 4, i64::MIN).unwrap();
        assert_eq!(rb.get_time_bounds().unwrap(), TimeBounds::new(i64::MIN, i64::MIN + 4));

        rb.write(&block(2, i64::MIN + 1, 4, 2), 4, i64::MIN + 1).unwrap();
        let bounds = rb.get_time_bounds().unwrap();
        assert_eq!(bounds, TimeBounds::new(i64::MIN, i64::MIN + 5));

        let mut dst = empty(2, 5);
        assert_eq!(rb.read(&mut dst, 5, i64::MIN).unwrap(), bounds);
        assert_eq!(frame(&dst, 0, 0), sample(0, i64::MIN, 1));
        assert_eq!(frame(&dst, 1, 4), sample(1, i64::MIN + 4, 2));
    }

    #[test]
    fn rewind_from_the_bottom_of_the_time_range_starts_fresh() {
        let mut rb = ring(64);
        rb.write(&block(2, i64::MIN + 1, 4, 1), 4, i64::MIN + 1).unwrap();
        rb.write(&block(2, i64::MIN, 2, 2), 2, i64::MIN).unwrap();
        assert_eq!(rb.get_time_bounds().unwrap(), TimeBounds::new(i64::MIN, i64::MIN + 2));
    }

    #[test]
    fn window_never_exceeds_capacity() {
        let mut rb = ring(32);
        let mut t = 0i64;
        for step in 0..500usize {
            let frames = 1 + step % 32;
            // Mostly contiguous, with periodic small gaps and rewinds.
            let start = match step % 7 {
                3 => t + 5,
                5 => t - 2,
                _ => t,
            };
            rb.write(&block(2, start, frames, 1), frames, start).unwrap();
            let bounds = rb.get_time_bounds().unwrap();
            assert!(bounds.len() <= 32, "window {bounds:?} exceeds capacity");
            assert!(bounds.contains(start + frames as i64 - 1));
            t = bounds.end;
        }
    }

    #[test]
    fn evicted_frames_are_no_longer_readable() {
        let mut rb = ring(16);
        for k in 0..4i64 {
            rb.write(&block(2, k * 8, 8, 1), 8, k * 8).unwrap();
        }
        assert_eq!(rb.get_time_bounds().unwrap(), TimeBounds::new(16, 32));

        let mut dst = empty(2, 16);
        let got = rb.read(&mut dst, 16, 8).unwrap();
        assert_eq!(got, TimeBounds::new(16, 24));
        for i in 0..8 {
            assert_eq!(frame(&dst, 0, i), [0; 4]);
            assert_eq!(frame(&dst, 0, 8 + i), sample(0, 16 + i as i64, 1));
        }
    }

    #[test]
    fn partial_overlap_pads_both_ends_with_silence() {
        let mut rb = ring(64);
        rb.write(&block(2, 100, 20, 1), 20, 100).unwrap();

        let mut dst = empty(2, 40);
        let got = rb.read(&mut dst, 40, 90).unwrap();
        assert_eq!(got, TimeBounds::new(100, 120));
        for i in 0..40usize {
            let time = 90 + i as i64;
            let expected = if got.contains(time) { sample(1, time, 1) } else { [0; 4] };
            assert_eq!(frame(&dst, 1, i), expected);
        }
        let snap = rb.diagnostics().snapshot();
        assert_eq!(snap.frames_read, 20);
        assert_eq!(snap.silence_frames_read, 20);
    }

    #[test]
    fn first_write_near_origin_fills_from_zero() {
        let mut rb = ring(64);
        rb.write(&block(2, 10, 4, 1), 4, 10).unwrap();
        assert_eq!(rb.get_time_bounds().unwrap(), TimeBounds::new(0, 14));
        assert_eq!(rb.diagnostics().snapshot().gap_frames_filled, 10);
    }

    #[test]
    fn touching_or_empty_ranges_do_not_overlap() {
        let mut rb = ring(64);
        let mut dst = empty(2, 8);
        assert!(matches!(
            rb.read(&mut dst, 8, 0),
            Err(ChronoringError::OutOfBounds { .. })
        ));

        rb.write(&block(2, 100, 20, 1), 20, 100).unwrap();
        assert!(rb.read(&mut dst, 8, 120).is_err());
        assert!(rb.read(&mut dst, 8, 92).is_err());
        assert_eq!(rb.read(&mut dst, 8, 93).unwrap(), TimeBounds::new(100, 101));
        assert_eq!(rb.diagnostics().snapshot().read_misses, 3);
    }

    #[test]
    fn frames_evicted_during_copy_are_silenced() {
        let mut rb = ring(64);
        rb.write(&block(2, 100, 20, 1), 20, 100).unwrap();
        let mut dst = empty(2, 20);
        rb.read(&mut dst, 20, 100).unwrap();

        let clamped = TimeBounds::new(100, 120);
        let got = rb
            .settle_read(&mut dst, 20, 100, clamped, false, Some(TimeBounds::new(108, 170)))
            .unwrap();
        assert_eq!(got, TimeBounds::new(108, 120));
        for i in 0..20usize {
            let expected = if i < 8 { [0; 4] } else { sample(0, 100 + i as i64, 1) };
            assert_eq!(frame(&dst, 0, i), expected);
        }
        assert_eq!(rb.diagnostics().snapshot().overrun_frames, 8);
    }

    #[test]
    fn rebase_during_copy_invalidates_everything() {
        let mut rb = ring(64);
        rb.write(&block(2, 100, 20, 1), 20, 100).unwrap();
        let mut dst = empty(2, 20);
        rb.read(&mut dst, 20, 100).unwrap();

        // The window looks unchanged, but the history was discarded and
        // rewritten while the frames were being copied.
        let clamped = TimeBounds::new(100, 120);
        let err = rb
            .settle_read(&mut dst, 20, 100, clamped, true, Some(clamped))
            .unwrap_err();
        assert!(matches!(err, ChronoringError::OutOfBounds { start: 100, end: 120 }));
        assert!(dst.iter().all(|s| s.iter().all(|&b| b == 0)));
    }

    #[test]
    fn window_moved_earlier_during_copy_silences_the_copy() {
        let mut rb = ring(64);
        rb.write(&block(2, 100, 20, 1), 20, 100).unwrap();
        let mut dst = empty(2, 24);
        rb.read(&mut dst, 24, 98).unwrap();

        let now = TimeBounds::new(60, 110);
        let got = rb
            .settle_read(&mut dst, 24, 98, TimeBounds::new(100, 120), false, Some(now))
            .unwrap();
        assert_eq!(got, TimeBounds::new(100, 110));
        for i in 0..24usize {
            let time = 98 + i as i64;
            let expected = if got.contains(time) { sample(1, time, 1) } else { [0; 4] };
            assert_eq!(frame(&dst, 1, i), expected);
        }
    }

    #[test]
    fn failed_validation_snapshot_reports_unavailable() {
        let mut rb = ring(64);
        rb.write(&block(2, 100, 20, 1), 20, 100).unwrap();
        let mut dst = empty(2, 20);
        rb.read(&mut dst, 20, 100).unwrap();

        let err = rb
            .settle_read(&mut dst, 20, 100, TimeBounds::new(100, 120), false, None)
            .unwrap_err();
        assert!(matches!(err, ChronoringError::TimeBoundsUnavailable));
        assert!(dst.iter().all(|s| s.iter().all(|&b| b == 0)));
    }

    #[test]
    fn clamp_intersects_with_window() {
        let mut rb = ring(64);
        rb.write(&block(2, 100, 50, 1), 50, 100).unwrap();
        assert_eq!(rb.clamp_times_to_bounds(90, 120).unwrap(), TimeBounds::new(100, 120));
        assert_eq!(rb.clamp_times_to_bounds(120, 200).unwrap(), TimeBounds::new(120, 150));
        assert!(rb.clamp_times_to_bounds(150, 160).is_err());
    }

    #[test]
    fn interleaved_format_uses_single_stream() {
        let format = AudioFormat::new(SampleFormat::I16, 44_100.0, 2, true);
        let mut rb = AudioRingBuffer::with_capacity(format, 8).unwrap();
        let src = [vec![1u8, 2, 3, 4, 5, 6, 7, 8]];
        rb.write(&src, 2, 0).unwrap();
        let mut dst = [vec![0u8; 8]];
        rb.read(&mut dst, 2, 0).unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn reallocation_resets_window() {
        let mut rb = ring(64);
        rb.write(&block(2, 500, 10, 1), 10, 500).unwrap();
        rb.allocate(stereo(), 128).unwrap();
        assert_eq!(rb.capacity_frames(), 128);
        assert_eq!(rb.get_time_bounds().unwrap(), TimeBounds::new(0, 0));
        assert_eq!(rb.diagnostics().snapshot().frames_written, 0);
    }

    #[test]
    fn reset_empties_window() {
        let mut rb = ring(16);
        rb.write(&block(2, 0, 16, 1), 16, 0).unwrap();
        rb.reset();
        assert_eq!(rb.get_time_bounds().unwrap(), TimeBounds::new(0, 0));
        assert!(rb.read(&mut empty(2, 4), 4, 0).is_err());
        assert!(rb.is_allocated());
    }

    #[test]
    fn writer_handle_tracks_its_own_bounds() {
        let mut rb = ring(64);
        let (mut writer, reader) = rb.split();
        writer.write(&block(2, 7, 9, 1), 9, 7).unwrap();
        assert_eq!((writer.start_time(), writer.end_time()), (0, 16));
        assert_eq!(reader.get_time_bounds().unwrap(), TimeBounds::new(0, 16));
    }

    #[test]
    fn owned_handles_cross_threads() {
        let (mut writer, mut reader) = ring(1024).into_split();
        let handle = thread::spawn(move || {
            for k in 0..64i64 {
                writer.write(&block(2, k * 16, 16, 3), 16, k * 16).unwrap();
            }
        });
        handle.join().expect("writer thread panicked");

        let mut dst = empty(2, 1024);
        assert_eq!(reader.read(&mut dst, 1024, 0).unwrap(), TimeBounds::new(0, 1024));
        assert_eq!(dst, block(2, 0, 1024, 3));
    }
}
