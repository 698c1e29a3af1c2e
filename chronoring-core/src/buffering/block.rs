//! Multi-channel audio blocks: one byte region per channel stream.
//!
//! Ring buffers accept any `AudioBlock` as a write source and any
//! `AudioBlockMut` as a read destination. Slices, arrays and vectors of byte
//! buffers implement both, as does `AudioBufferList`.

/// Read access to a block of channel streams.
pub trait AudioBlock {
    /// Number of channel streams in the block.
    fn stream_count(&self) -> usize;

    /// Bytes of stream `index`.
    ///
    /// # Panics
    /// Implementations panic when `index >= stream_count()`.
    fn stream(&self, index: usize) -> &[u8];
}

/// Write access to a block of channel streams.
pub trait AudioBlockMut: AudioBlock {
    /// Mutable bytes of stream `index`.
    ///
    /// # Panics
    /// Implementations panic when `index >= stream_count()`.
    fn stream_mut(&mut self, index: usize) -> &mut [u8];
}

impl<S: AsRef<[u8]>> AudioBlock for [S] {
    fn stream_count(&self) -> usize {
        self.len()
    }

    fn stream(&self, index: usize) -> &[u8] {
        self[index].as_ref()
    }
}

impl<S: AsRef<[u8]> + AsMut<[u8]>> AudioBlockMut for [S] {
    fn stream_mut(&mut self, index: usize) -> &mut [u8] {
        self[index].as_mut()
    }
}

impl<S: AsRef<[u8]>, const N: usize> AudioBlock for [S; N] {
    fn stream_count(&self) -> usize {
        N
    }

    fn stream(&self, index: usize) -> &[u8] {
        self[index].as_ref()
    }
}

impl<S: AsRef<[u8]> + AsMut<[u8]>, const N: usize> AudioBlockMut for [S; N] {
    fn stream_mut(&mut self, index: usize) -> &mut [u8] {
        self[index].as_mut()
    }
}

impl<S: AsRef<[u8]>> AudioBlock for Vec<S> {
    fn stream_count(&self) -> usize {
        self.len()
    }

    fn stream(&self, index: usize) -> &[u8] {
        self[index].as_ref()
    }
}

impl<S: AsRef<[u8]> + AsMut<[u8]>> AudioBlockMut for Vec<S> {
    fn stream_mut(&mut self, index: usize) -> &mut [u8] {
        self[index].as_mut()
    }
}
