use thiserror::Error;

/// Errors from chunker configuration.
///
/// Chunking itself cannot fail: it is a pure function of the input bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("invalid chunk bounds: min {min} <= target {target} <= max {max} violated")]
    InvalidBounds { min: u64, target: u64, max: u64 },

    #[error("chunk sizes must be non-zero")]
    ZeroChunkSize,

    #[error("rolling window size must be non-zero")]
    ZeroWindow,
}

/// Result alias for chunker operations.
pub type ChunkResult<T> = Result<T, ChunkError>;
