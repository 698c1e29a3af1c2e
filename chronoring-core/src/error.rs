use thiserror::Error;

/// All errors produced by chronoring.
///
/// Variants raised on the read/write path carry only plain data, so returning
/// one from a real-time thread never allocates.
#[derive(Debug, Error)]
pub enum ChronoringError {
    #[error("capacity {requested} is outside [2, 2^31] or not a power of two")]
    InvalidCapacity { requested: usize },

    #[error("unusable audio format: {0}")]
    InvalidFormat(&'static str),

    #[error("failed to allocate {bytes} bytes of ring storage")]
    AllocationFailed { bytes: usize },

    #[error("ring buffer is not allocated")]
    NotAllocated,

    #[error("{frames} frames exceeds the ring capacity of {capacity} frames")]
    FrameCountExceedsCapacity { frames: usize, capacity: usize },

    #[error("sample time range overflows a 64-bit frame counter")]
    TimeOverflow,

    #[error("time bounds snapshot could not be read consistently")]
    TimeBoundsUnavailable,

    #[error("requested range [{start}, {end}) lies outside the buffered audio")]
    OutOfBounds { start: i64, end: i64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ChronoringError>;
