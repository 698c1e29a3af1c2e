//! Shared backing store for the ring buffers.
//!
//! One owned arena is carved into `stream_count` equally sized regions, one
//! per channel stream, so the whole ring lives in a single contiguous heap
//! block. The arena is interior-mutable: the writer and the reader of a ring
//! touch it through `&self`, each restricted to the byte ranges the ring's
//! cursor/time-bounds protocol hands them.

use std::cell::UnsafeCell;
use std::ptr;

use crate::error::{ChronoringError, Result};

pub(crate) struct ChannelStorage {
    arena: Box<[UnsafeCell<u8>]>,
    stream_bytes: usize,
    stream_count: usize,
}

impl ChannelStorage {
    /// Allocates zeroed storage, reporting allocation failure instead of aborting.
    pub(crate) fn try_new(stream_count: usize, stream_bytes: usize) -> Result<Self> {
        let total = stream_count
            .checked_mul(stream_bytes)
            .filter(|&total| total <= isize::MAX as usize)
            .ok_or(ChronoringError::AllocationFailed { bytes: usize::MAX })?;

        let mut arena: Vec<UnsafeCell<u8>> = Vec::new();
        arena
            .try_reserve_exact(total)
            .map_err(|_| ChronoringError::AllocationFailed { bytes: total })?;
        arena.resize_with(total, || UnsafeCell::new(0));

        Ok(Self {
            arena: arena.into_boxed_slice(),
            stream_bytes,
            stream_count,
        })
    }

    pub(crate) fn stream_count(&self) -> usize {
        self.stream_count
    }

    pub(crate) fn total_bytes(&self) -> usize {
        self.arena.len()
    }

    fn stream_ptr(&self, stream: usize) -> *mut u8 {
        assert!(stream < self.stream_count, "channel stream index out of range");
        // `UnsafeCell<u8>` has the layout of `u8`; the pointer keeps the
        // provenance of the whole arena.
        let base = UnsafeCell::raw_get(self.arena.as_ptr());
        unsafe { base.add(stream * self.stream_bytes) }
    }

    /// Copies `src` into `stream` starting at byte `offset`.
    ///
    /// # Safety
    /// The range must not be accessed concurrently by another thread except
    /// under the owning ring's publication protocol.
    pub(crate) unsafe fn store(&self, stream: usize, offset: usize, src: &[u8]) {
        assert!(offset + src.len() <= self.stream_bytes);
        ptr::copy_nonoverlapping(src.as_ptr(), self.stream_ptr(stream).add(offset), src.len());
    }

    /// Zeroes `len` bytes of `stream` starting at byte `offset`.
    ///
    /// # Safety
    /// Same contract as [`ChannelStorage::store`].
    pub(crate) unsafe fn zero(&self, stream: usize, offset: usize, len: usize) {
        assert!(offset + len <= self.stream_bytes);
        ptr::write_bytes(self.stream_ptr(stream).add(offset), 0, len);
    }

    /// Copies bytes of `stream` starting at `offset` into `dst`.
    ///
    /// # Safety
    /// Same contract as [`ChannelStorage::store`].
    pub(crate) unsafe fn load(&self, stream: usize, offset: usize, dst: &mut [u8]) {
        assert!(offset + dst.len() <= self.stream_bytes);
        ptr::copy_nonoverlapping(self.stream_ptr(stream).add(offset), dst.as_mut_ptr(), dst.len());
    }

    /// Borrows `len` bytes of `stream` starting at `offset`.
    ///
    /// # Safety
    /// The caller must guarantee no writes to the range for the lifetime of
    /// the returned slice.
    pub(crate) unsafe fn slice(&self, stream: usize, offset: usize, len: usize) -> &[u8] {
        assert!(offset + len <= self.stream_bytes);
        std::slice::from_raw_parts(self.stream_ptr(stream).add(offset), len)
    }

    /// Mutably borrows `len` bytes of `stream` starting at `offset`.
    ///
    /// # Safety
    /// The caller must guarantee exclusive access to the range for the
    /// lifetime of the returned slice.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn slice_mut(&self, stream: usize, offset: usize, len: usize) -> &mut [u8] {
        assert!(offset + len <= self.stream_bytes);
        std::slice::from_raw_parts_mut(self.stream_ptr(stream).add(offset), len)
    }

    /// Zeroes the whole arena. Requires exclusive access.
    pub(crate) fn clear(&mut self) {
        for byte in self.arena.iter_mut() {
            *byte.get_mut() = 0;
        }
    }
}
