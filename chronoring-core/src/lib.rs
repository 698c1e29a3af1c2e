//! # chronoring
//!
//! Lock-free single-producer/single-consumer ring buffers for audio I/O.
//!
//! ## Architecture
//!
//! ```text
//! Audio thread → AudioRingWriter::write(block, frames, sample_time)
//!                        │
//!              ChannelStorage (one arena, one region per channel stream)
//!                        │
//!              TimeBoundsQueue publishes [start, end) per write
//!                        │
//! Consumer     → AudioRingReader::read(block, frames, sample_time)
//!                  (clamped to the window, silence elsewhere)
//! ```
//!
//! [`ByteRingBuffer`] is the untimed sibling: a byte FIFO with atomic cursors.
//!
//! Reads and writes never block and never allocate. All allocation happens in
//! `allocate`, which requires `&mut self` and therefore cannot race with I/O.

#![warn(clippy::all)]

pub mod buffering;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod format;

// Convenience re-exports for downstream crates
pub use buffering::{
    AudioBlock, AudioBlockMut, AudioBufferList, AudioRingBuffer, AudioRingReader,
    AudioRingWriter, ByteRingBuffer, ByteRingReader, ByteRingWriter, TimeBounds,
};
pub use config::RingConfig;
pub use diagnostics::{DiagnosticsSnapshot, RingDiagnostics};
pub use error::{ChronoringError, Result};
pub use format::{AudioFormat, SampleFormat};
