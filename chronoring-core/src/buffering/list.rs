//! Owned multi-channel audio block with a variable valid length.
//!
//! An `AudioBufferList` holds up to `frame_capacity` frames of one
//! [`AudioFormat`] in a single allocation. The first `frame_length` frames of
//! each stream are valid. The editing operations keep that prefix contiguous:
//! inserting shifts later frames toward the end and trimming shifts them back.
//! Every edit returns the number of frames it actually affected. Edits between
//! lists of different formats affect nothing.

use super::block::{AudioBlock, AudioBlockMut};
use crate::error::{ChronoringError, Result};
use crate::format::AudioFormat;

#[derive(Clone, PartialEq)]
pub struct AudioBufferList {
    format: AudioFormat,
    data: Vec<u8>,
    bytes_per_frame: usize,
    frame_capacity: usize,
    frame_length: usize,
}

impl AudioBufferList {
    /// An unallocated list. Holds no frames until [`AudioBufferList::allocate`].
    pub fn new() -> Self {
        Self {
            format: AudioFormat::default(),
            data: Vec::new(),
            bytes_per_frame: 0,
            frame_capacity: 0,
            frame_length: 0,
        }
    }

    pub fn with_capacity(format: AudioFormat, frame_capacity: usize) -> Result<Self> {
        let mut list = Self::new();
        list.allocate(format, frame_capacity)?;
        Ok(list)
    }

    /// Allocates zeroed storage for `frame_capacity` frames, replacing any
    /// previous allocation. The new list is empty.
    pub fn allocate(&mut self, format: AudioFormat, frame_capacity: usize) -> Result<()> {
        self.deallocate();
        format.validate()?;

        let bytes_per_frame = format.bytes_per_frame() as usize;
        let total = frame_capacity
            .checked_mul(bytes_per_frame)
            .and_then(|bytes| bytes.checked_mul(format.channel_stream_count() as usize))
            .ok_or(ChronoringError::AllocationFailed { bytes: usize::MAX })?;

        let mut data = Vec::new();
        data.try_reserve_exact(total)
            .map_err(|_| ChronoringError::AllocationFailed { bytes: total })?;
        data.resize(total, 0);

        self.format = format;
        self.data = data;
        self.bytes_per_frame = bytes_per_frame;
        self.frame_capacity = frame_capacity;
        Ok(())
    }

    pub fn deallocate(&mut self) {
        *self = Self::new();
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn frame_capacity(&self) -> usize {
        self.frame_capacity
    }

    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    /// Sets the number of valid frames. Fails when it exceeds the capacity.
    pub fn set_frame_length(&mut self, frame_length: usize) -> bool {
        if frame_length > self.frame_capacity {
            return false;
        }
        self.frame_length = frame_length;
        true
    }

    /// Marks the whole capacity valid.
    pub fn reset(&mut self) {
        self.frame_length = self.frame_capacity;
    }

    /// Marks no frames valid.
    pub fn clear(&mut self) {
        self.frame_length = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.frame_length == 0
    }

    pub fn is_full(&self) -> bool {
        self.frame_length == self.frame_capacity
    }

    /// Valid bytes of channel stream `index`.
    pub fn channel(&self, index: usize) -> &[u8] {
        let (start, _) = self.stream_range(index);
        &self.data[start..start + self.frame_length * self.bytes_per_frame]
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut [u8] {
        let (start, _) = self.stream_range(index);
        let len = self.frame_length * self.bytes_per_frame;
        &mut self.data[start..start + len]
    }

    fn streams(&self) -> usize {
        if self.frame_capacity == 0 {
            return 0;
        }
        self.format.channel_stream_count() as usize
    }

    fn stream_range(&self, index: usize) -> (usize, usize) {
        assert!(index < self.streams(), "channel stream index out of range");
        let stream_bytes = self.frame_capacity * self.bytes_per_frame;
        (index * stream_bytes, (index + 1) * stream_bytes)
    }

    /// Shifts frames `[from, frame_length)` of every stream to start at `to`.
    fn shift_tail(&mut self, from: usize, to: usize) {
        let bpf = self.bytes_per_frame;
        let tail = (self.frame_length - from) * bpf;
        for index in 0..self.streams() {
            let (start, end) = self.stream_range(index);
            let stream = &mut self.data[start..end];
            stream.copy_within(from * bpf..from * bpf + tail, to * bpf);
        }
    }

    /// Inserts up to `frame_length` frames of `buffer`, read from
    /// `read_offset`, at `write_offset`. Frames from `write_offset` onward move
    /// toward the end. Insertion stops at this list's capacity.
    pub fn insert_from_buffer(
        &mut self,
        buffer: &AudioBufferList,
        read_offset: usize,
        frame_length: usize,
        write_offset: usize,
    ) -> usize {
        if buffer.format != self.format
            || read_offset > buffer.frame_length
            || write_offset > self.frame_length
        {
            return 0;
        }

        let frames = frame_length
            .min(buffer.frame_length - read_offset)
            .min(self.frame_capacity - self.frame_length);
        if frames == 0 {
            return 0;
        }

        self.shift_tail(write_offset, write_offset + frames);

        let bpf = self.bytes_per_frame;
        for index in 0..self.streams() {
            let (start, _) = self.stream_range(index);
            let (src_start, _) = buffer.stream_range(index);
            let src = &buffer.data[src_start + read_offset * bpf..src_start + (read_offset + frames) * bpf];
            self.data[start + write_offset * bpf..start + (write_offset + frames) * bpf]
                .copy_from_slice(src);
        }

        self.frame_length += frames;
        frames
    }

    pub fn insert_contents_of_buffer(&mut self, buffer: &AudioBufferList, write_offset: usize) -> usize {
        self.insert_from_buffer(buffer, 0, buffer.frame_length, write_offset)
    }

    pub fn append_contents_of_buffer(&mut self, buffer: &AudioBufferList) -> usize {
        self.insert_from_buffer(buffer, 0, buffer.frame_length, self.frame_length)
    }

    /// Appends at most `frame_length` frames of `buffer` starting at `read_offset`.
    pub fn append_from_buffer(
        &mut self,
        buffer: &AudioBufferList,
        read_offset: usize,
        frame_length: usize,
    ) -> usize {
        self.insert_from_buffer(buffer, read_offset, frame_length, self.frame_length)
    }

    pub fn prepend_contents_of_buffer(&mut self, buffer: &AudioBufferList) -> usize {
        self.insert_from_buffer(buffer, 0, buffer.frame_length, 0)
    }

    pub fn prepend_from_buffer(
        &mut self,
        buffer: &AudioBufferList,
        read_offset: usize,
        frame_length: usize,
    ) -> usize {
        self.insert_from_buffer(buffer, read_offset, frame_length, 0)
    }

    /// Removes up to `frame_length` frames starting at `offset`.
    pub fn trim_at_offset(&mut self, offset: usize, frame_length: usize) -> usize {
        if offset > self.frame_length {
            return 0;
        }
        let frames = frame_length.min(self.frame_length - offset);
        if frames == 0 {
            return 0;
        }
        self.shift_tail(offset + frames, offset);
        self.frame_length -= frames;
        frames
    }

    pub fn trim_first(&mut self, frame_length: usize) -> usize {
        self.trim_at_offset(0, frame_length)
    }

    pub fn trim_last(&mut self, frame_length: usize) -> usize {
        let frames = frame_length.min(self.frame_length);
        self.frame_length -= frames;
        frames
    }

    /// Inserts up to `frame_length` frames of silence at `offset`.
    pub fn insert_silence(&mut self, offset: usize, frame_length: usize) -> usize {
        if offset > self.frame_length {
            return 0;
        }
        let frames = frame_length.min(self.frame_capacity - self.frame_length);
        if frames == 0 {
            return 0;
        }

        self.shift_tail(offset, offset + frames);

        let bpf = self.bytes_per_frame;
        for index in 0..self.streams() {
            let (start, _) = self.stream_range(index);
            self.data[start + offset * bpf..start + (offset + frames) * bpf].fill(0);
        }

        self.frame_length += frames;
        frames
    }

    pub fn append_silence(&mut self, frame_length: usize) -> usize {
        self.insert_silence(self.frame_length, frame_length)
    }

    /// Pads the list to full capacity with silence.
    pub fn fill_remainder_with_silence(&mut self) -> usize {
        self.insert_silence(self.frame_length, self.frame_capacity - self.frame_length)
    }
}

impl Default for AudioBufferList {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AudioBufferList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioBufferList")
            .field("format", &self.format)
            .field("frame_capacity", &self.frame_capacity)
            .field("frame_length", &self.frame_length)
            .finish()
    }
}

/// Ring buffers see the whole capacity of each stream, so a list can be
/// filled by a read and then trimmed to the frames that matter.
impl AudioBlock for AudioBufferList {
    fn stream_count(&self) -> usize {
        self.streams()
    }

    fn stream(&self, index: usize) -> &[u8] {
        let (start, end) = self.stream_range(index);
        &self.data[start..end]
    }
}

impl AudioBlockMut for AudioBufferList {
    fn stream_mut(&mut self, index: usize) -> &mut [u8] {
        let (start, end) = self.stream_range(index);
        &mut self.data[start..end]
    }
}
