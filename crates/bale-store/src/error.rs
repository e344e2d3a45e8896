use bale_types::BlobId;

/// Errors from blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested blob was not found.
    #[error("blob not found: {0}")]
    NotFound(BlobId),

    /// The requested ref was not found.
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// Content hash mismatch on read (data corruption).
    #[error("hash mismatch for {id}: computed {computed}")]
    HashMismatch { id: BlobId, computed: BlobId },

    /// A sub-range read that does not fit inside the blob.
    #[error("range {offset}+{length} out of bounds for {id} ({actual} bytes)")]
    InvalidRange {
        id: BlobId,
        offset: u64,
        length: u64,
        actual: u64,
    },

    /// I/O error from the underlying storage backend. Retryable by the
    /// caller; never retried internally.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
