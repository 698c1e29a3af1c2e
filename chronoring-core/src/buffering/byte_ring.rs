//! Lock-free SPSC ring buffer of raw bytes.
//!
//! ## Cursors
//!
//! The read and write positions are free-running counters that are only
//! masked when they are turned into storage offsets. `write - read` is
//! therefore the exact number of readable bytes, and a full buffer is never
//! confused with an empty one. Capacities are powers of two so masking is a
//! single AND.
//!
//! ## Threading
//!
//! `allocate`, `deallocate` and `reset` take `&mut self`. Concurrent use goes
//! through [`ByteRingBuffer::split`] (borrowed handles for scoped threads) or
//! [`ByteRingBuffer::into_split`] (`Arc`-owned handles). Neither side ever
//! blocks; short transfers are reported through the returned byte count.

use std::ops::Deref;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tracing::{debug, info, warn};

use super::storage::ChannelStorage;
use crate::error::{ChronoringError, Result};

/// Smallest supported capacity, in bytes.
pub const MIN_CAPACITY_BYTES: usize = 2;
/// Largest supported capacity, in bytes (2^31).
pub const MAX_CAPACITY_BYTES: usize = 1 << 31;

pub struct ByteRingBuffer {
    storage: Option<ChannelStorage>,
    capacity_bytes: usize,
    /// `capacity_bytes - 1`
    capacity_mask: usize,
    write_position: AtomicUsize,
    read_position: AtomicUsize,
}

// Safety: the storage is only mutated through `&mut self` or through the
// single writer handle, which confines itself to the writable region published
// by the cursors. The reader handle only touches the readable region.
unsafe impl Sync for ByteRingBuffer {}

impl ByteRingBuffer {
    /// Creates an empty, unallocated buffer.
    pub fn new() -> Self {
        Self {
            storage: None,
            capacity_bytes: 0,
            capacity_mask: 0,
            write_position: AtomicUsize::new(0),
            read_position: AtomicUsize::new(0),
        }
    }

    /// Creates a buffer holding at least `byte_count` bytes.
    pub fn with_capacity(byte_count: usize) -> Result<Self> {
        let mut ring = Self::new();
        ring.allocate(byte_count)?;
        Ok(ring)
    }

    /// Allocates space for at least `byte_count` bytes, rounded up to the next
    /// power of two. Any previous allocation is released first, and a failed
    /// call leaves the buffer unallocated.
    pub fn allocate(&mut self, byte_count: usize) -> Result<()> {
        self.deallocate();

        if !(MIN_CAPACITY_BYTES..=MAX_CAPACITY_BYTES).contains(&byte_count) {
            warn!(byte_count, "rejected byte ring capacity");
            return Err(ChronoringError::InvalidCapacity {
                requested: byte_count,
            });
        }

        let capacity = byte_count.next_power_of_two();
        let storage = ChannelStorage::try_new(1, capacity).map_err(|e| {
            warn!(capacity, "byte ring allocation failed");
            e
        })?;

        self.storage = Some(storage);
        self.capacity_bytes = capacity;
        self.capacity_mask = capacity - 1;
        info!(capacity_bytes = capacity, "allocated byte ring buffer");
        Ok(())
    }

    /// Releases the storage. The buffer can be allocated again afterwards.
    pub fn deallocate(&mut self) {
        if self.storage.take().is_some() {
            debug!(capacity_bytes = self.capacity_bytes, "deallocated byte ring buffer");
        }
        self.capacity_bytes = 0;
        self.capacity_mask = 0;
        self.reset();
    }

    /// Discards all buffered data.
    pub fn reset(&mut self) {
        *self.write_position.get_mut() = 0;
        *self.read_position.get_mut() = 0;
    }

    pub fn is_allocated(&self) -> bool {
        self.storage.is_some()
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    pub fn bytes_available_to_read(&self) -> usize {
        let write = self.write_position.load(Ordering::Acquire);
        let read = self.read_position.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    pub fn bytes_available_to_write(&self) -> usize {
        self.capacity_bytes - self.bytes_available_to_read()
    }

    /// Copies up to `src.len()` bytes in; returns the number written.
    pub fn write(&mut self, src: &[u8]) -> usize {
        unsafe { self.write_shared(src) }
    }

    /// Copies up to `dst.len()` bytes out; returns the number read.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        unsafe { self.read_shared(dst, true) }
    }

    /// Like [`ByteRingBuffer::read`] without consuming the bytes.
    pub fn peek(&self, dst: &mut [u8]) -> usize {
        // `&self` excludes every writer: handles need `&mut self` to exist.
        unsafe { self.read_shared(dst, false) }
    }

    /// Readable bytes as up to two spans, split at the wrap point.
    pub fn read_vector(&self) -> (&[u8], &[u8]) {
        unsafe { self.read_vector_shared() }
    }

    /// Writable space as up to two spans, split at the wrap point.
    pub fn write_vector(&mut self) -> (&mut [u8], &mut [u8]) {
        unsafe { self.write_vector_shared() }
    }

    /// Commits bytes consumed through [`ByteRingBuffer::read_vector`].
    pub fn advance_read_position(&mut self, byte_count: usize) {
        self.advance_read_shared(byte_count);
    }

    /// Commits bytes produced through [`ByteRingBuffer::write_vector`].
    pub fn advance_write_position(&mut self, byte_count: usize) {
        self.advance_write_shared(byte_count);
    }

    /// Splits into borrowed writer/reader handles for use on two threads.
    pub fn split(&mut self) -> (ByteRingWriter<&Self>, ByteRingReader<&Self>) {
        let ring: &Self = self;
        (ByteRingWriter { ring }, ByteRingReader { ring })
    }

    /// Splits into `Arc`-owned writer/reader handles.
    pub fn into_split(self) -> (ByteRingWriter<Arc<Self>>, ByteRingReader<Arc<Self>>) {
        let ring = Arc::new(self);
        (
            ByteRingWriter {
                ring: Arc::clone(&ring),
            },
            ByteRingReader { ring },
        )
    }

    /// # Safety
    /// Must only be called by the single writer.
    unsafe fn write_shared(&self, src: &[u8]) -> usize {
        let Some(storage) = &self.storage else {
            return 0;
        };

        let write = self.write_position.load(Ordering::Relaxed);
        let read = self.read_position.load(Ordering::Acquire);
        let available = self.capacity_bytes - write.wrapping_sub(read);
        let count = src.len().min(available);
        if count == 0 {
            return 0;
        }

        let offset = write & self.capacity_mask;
        let first = count.min(self.capacity_bytes - offset);
        storage.store(0, offset, &src[..first]);
        if first < count {
            storage.store(0, 0, &src[first..count]);
        }

        self.write_position
            .store(write.wrapping_add(count), Ordering::Release);
        count
    }

    /// # Safety
    /// Must only be called by the single reader.
    unsafe fn read_shared(&self, dst: &mut [u8], advance: bool) -> usize {
        let Some(storage) = &self.storage else {
            return 0;
        };

        let read = self.read_position.load(Ordering::Relaxed);
        let write = self.write_position.load(Ordering::Acquire);
        let count = dst.len().min(write.wrapping_sub(read));
        if count == 0 {
            return 0;
        }

        let offset = read & self.capacity_mask;
        let first = count.min(self.capacity_bytes - offset);
        storage.load(0, offset, &mut dst[..first]);
        if first < count {
            storage.load(0, 0, &mut dst[first..count]);
        }

        if advance {
            self.read_position
                .store(read.wrapping_add(count), Ordering::Release);
        }
        count
    }

    /// # Safety
    /// Must only be called by the single reader; the spans stay valid until
    /// the read position is advanced.
    unsafe fn read_vector_shared(&self) -> (&[u8], &[u8]) {
        let Some(storage) = &self.storage else {
            return (&[], &[]);
        };

        let read = self.read_position.load(Ordering::Relaxed);
        let write = self.write_position.load(Ordering::Acquire);
        let count = write.wrapping_sub(read);
        let offset = read & self.capacity_mask;
        let first = count.min(self.capacity_bytes - offset);

        (
            storage.slice(0, offset, first),
            storage.slice(0, 0, count - first),
        )
    }

    /// # Safety
    /// Must only be called by the single writer; the spans stay valid until
    /// the write position is advanced.
    #[allow(clippy::mut_from_ref)]
    unsafe fn write_vector_shared(&self) -> (&mut [u8], &mut [u8]) {
        let Some(storage) = &self.storage else {
            return (&mut [], &mut []);
        };

        let write = self.write_position.load(Ordering::Relaxed);
        let read = self.read_position.load(Ordering::Acquire);
        let count = self.capacity_bytes - write.wrapping_sub(read);
        let offset = write & self.capacity_mask;
        let first = count.min(self.capacity_bytes - offset);

        (
            storage.slice_mut(0, offset, first),
            storage.slice_mut(0, 0, count - first),
        )
    }

    /// Advances at most to the write position.
    fn advance_read_shared(&self, byte_count: usize) {
        let read = self.read_position.load(Ordering::Relaxed);
        let write = self.write_position.load(Ordering::Acquire);
        let count = byte_count.min(write.wrapping_sub(read));
        self.read_position
            .store(read.wrapping_add(count), Ordering::Release);
    }

    /// Advances at most to the end of the writable space.
    fn advance_write_shared(&self, byte_count: usize) {
        let write = self.write_position.load(Ordering::Relaxed);
        let read = self.read_position.load(Ordering::Acquire);
        let count = byte_count.min(self.capacity_bytes - write.wrapping_sub(read));
        self.write_position
            .store(write.wrapping_add(count), Ordering::Release);
    }
}

impl Default for ByteRingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ByteRingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteRingBuffer")
            .field("capacity_bytes", &self.capacity_bytes)
            .field("write_position", &self.write_position.load(Ordering::Relaxed))
            .field("read_position", &self.read_position.load(Ordering::Relaxed))
            .finish()
    }
}

/// Producer half of a [`ByteRingBuffer`].
pub struct ByteRingWriter<R: Deref<Target = ByteRingBuffer>> {
    ring: R,
}

impl<R: Deref<Target = ByteRingBuffer>> ByteRingWriter<R> {
    pub fn write(&mut self, src: &[u8]) -> usize {
        // Safety: this handle is the only writer.
        unsafe { self.ring.write_shared(src) }
    }

    pub fn write_vector(&mut self) -> (&mut [u8], &mut [u8]) {
        unsafe { self.ring.write_vector_shared() }
    }

    pub fn advance_write_position(&mut self, byte_count: usize) {
        self.ring.advance_write_shared(byte_count);
    }

    pub fn bytes_available_to_write(&self) -> usize {
        self.ring.bytes_available_to_write()
    }

    pub fn capacity_bytes(&self) -> usize {
        self.ring.capacity_bytes()
    }
}

/// Consumer half of a [`ByteRingBuffer`].
pub struct ByteRingReader<R: Deref<Target = ByteRingBuffer>> {
    ring: R,
}

impl<R: Deref<Target = ByteRingBuffer>> ByteRingReader<R> {
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        // Safety: this handle is the only reader.
        unsafe { self.ring.read_shared(dst, true) }
    }

    pub fn peek(&self, dst: &mut [u8]) -> usize {
        unsafe { self.ring.read_shared(dst, false) }
    }

    pub fn read_vector(&self) -> (&[u8], &[u8]) {
        unsafe { self.ring.read_vector_shared() }
    }

    pub fn advance_read_position(&mut self, byte_count: usize) {
        self.ring.advance_read_shared(byte_count);
    }

    pub fn bytes_available_to_read(&self) -> usize {
        self.ring.bytes_available_to_read()
    }

    pub fn capacity_bytes(&self) -> usize {
        self.ring.capacity_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn ring(capacity: usize) -> ByteRingBuffer {
        ByteRingBuffer::with_capacity(capacity).unwrap()
    }

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        assert_eq!(ring(2).capacity_bytes(), 2);
        assert_eq!(ring(3).capacity_bytes(), 4);
        assert_eq!(ring(1000).capacity_bytes(), 1024);
        assert_eq!(ring(1024).capacity_bytes(), 1024);
    }

    #[test]
    fn out_of_range_capacity_is_rejected() {
        let mut rb = ring(16);
        let err = rb.allocate(1).unwrap_err();
        assert!(matches!(err, ChronoringError::InvalidCapacity { requested: 1 }));
        assert_eq!(
            err.to_string(),
            "capacity 1 is outside [2, 2^31] or not a power of two"
        );
        assert!(!rb.is_allocated());
        assert_eq!(rb.capacity_bytes(), 0);

        assert!(ByteRingBuffer::with_capacity(0).is_err());
        assert!(ByteRingBuffer::with_capacity(MAX_CAPACITY_BYTES + 1).is_err());
    }

    #[test]
    fn unallocated_buffer_moves_nothing() {
        let mut rb = ByteRingBuffer::new();
        assert_eq!(rb.write(&[1, 2, 3]), 0);
        assert_eq!(rb.read(&mut [0; 3]), 0);
        assert_eq!(rb.bytes_available_to_write(), 0);
        let (a, b) = rb.read_vector();
        assert!(a.is_empty() && b.is_empty());
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut rb = ring(16);
        assert_eq!(rb.write(b"hello"), 5);
        assert_eq!(rb.bytes_available_to_read(), 5);
        assert_eq!(rb.bytes_available_to_write(), 11);

        let mut out = [0u8; 5];
        assert_eq!(rb.read(&mut out), 5);
        assert_eq!(&out, b"hello");
        assert_eq!(rb.bytes_available_to_read(), 0);
    }

    #[test]
    fn partial_transfers_report_available_count() {
        let mut rb = ring(8);
        assert_eq!(rb.write(&[7; 12]), 8);
        assert_eq!(rb.write(&[1]), 0);
        assert_eq!(rb.bytes_available_to_write(), 0);

        let mut out = [0u8; 3];
        assert_eq!(rb.read(&mut out), 3);
        let mut rest = [0u8; 10];
        assert_eq!(rb.read(&mut rest), 5);
        assert_eq!(rb.read(&mut rest), 0);
    }

    #[test]
    fn transfers_straddle_the_wrap_point() {
        let mut rb = ring(8);
        rb.write(&[0; 6]);
        rb.read(&mut [0; 6]);

        let data = [1, 2, 3, 4, 5, 6];
        assert_eq!(rb.write(&data), 6);
        let (first, second) = rb.read_vector();
        assert_eq!(first, &[1, 2]);
        assert_eq!(second, &[3, 4, 5, 6]);

        let mut out = [0u8; 6];
        assert_eq!(rb.read(&mut out), 6);
        assert_eq!(out, data);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut rb = ring(8);
        rb.write(&[9, 8, 7]);
        let mut out = [0u8; 2];
        assert_eq!(rb.peek(&mut out), 2);
        assert_eq!(out, [9, 8]);
        assert_eq!(rb.bytes_available_to_read(), 3);
    }

    #[test]
    fn vectors_commit_through_advance() {
        let mut rb = ring(8);
        rb.write(&[0; 5]);
        rb.read(&mut [0; 5]);

        let (first, second) = rb.write_vector();
        assert_eq!(first.len() + second.len(), 8);
        first.fill(0xAA);
        second[0] = 0xBB;
        let produced = first.len() + 1;
        rb.advance_write_position(produced);
        assert_eq!(rb.bytes_available_to_read(), produced);

        let (first, second) = rb.read_vector();
        assert_eq!(first, &[0xAA; 3]);
        assert_eq!(second, &[0xBB]);
        rb.advance_read_position(100);
        assert_eq!(rb.bytes_available_to_read(), 0);
    }

    #[test]
    fn availability_always_sums_to_capacity() {
        let mut rb = ring(32);
        let mut scratch = [0u8; 32];
        for step in 0..200usize {
            if step % 3 == 0 {
                rb.read(&mut scratch[..step % 11]);
            } else {
                rb.write(&scratch[..step % 13]);
            }
            assert_eq!(
                rb.bytes_available_to_read() + rb.bytes_available_to_write(),
                rb.capacity_bytes()
            );
        }
    }

    #[test]
    fn reset_discards_data() {
        let mut rb = ring(8);
        rb.write(&[1, 2, 3]);
        rb.reset();
        assert_eq!(rb.bytes_available_to_read(), 0);
        assert_eq!(rb.bytes_available_to_write(), 8);
    }

    #[test]
    fn scoped_threads_transfer_a_byte_stream_in_order() {
        let mut rb = ring(64);
        let (mut tx, mut rx) = rb.split();
        let total = 50_000usize;

        thread::scope(|s| {
            s.spawn(move || {
                let mut next = 0usize;
                while next < total {
                    let chunk: Vec<u8> = (next..(next + 7).min(total)).map(|i| i as u8).collect();
                    next += tx.write(&chunk);
                    thread::yield_now();
                }
            });

            let mut expected = 0usize;
            let mut buf = [0u8; 16];
            while expected < total {
                let n = rx.read(&mut buf);
                for &b in &buf[..n] {
                    assert_eq!(b, expected as u8);
                    expected += 1;
                }
                if n == 0 {
                    thread::yield_now();
                }
            }
        });
    }
}
