//! Lock-free SPSC ring buffers.
//!
//! [`ByteRingBuffer`] moves raw bytes between one producer and one consumer.
//! [`AudioRingBuffer`] stores deinterleaved audio addressed by absolute sample
//! time, so a reader can fetch any window the writer has not yet evicted.
//!
//! Both are configured through `&mut self` and then split into a writer and a
//! reader handle. The handles never block or allocate.

pub mod audio_ring;
pub mod block;
pub mod byte_ring;
pub mod list;
pub(crate) mod storage;
pub mod time_bounds;

pub use audio_ring::{AudioRingBuffer, AudioRingReader, AudioRingWriter};
pub use block::{AudioBlock, AudioBlockMut};
pub use byte_ring::{ByteRingBuffer, ByteRingReader, ByteRingWriter};
pub use list::AudioBufferList;
pub use time_bounds::TimeBounds;
