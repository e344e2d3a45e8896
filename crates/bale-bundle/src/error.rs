use thiserror::Error;

use bale_store::StoreError;
use bale_types::BlobId;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("invalid bundle magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported bundle version: {0}")]
    UnsupportedVersion(u32),

    #[error("bundle checksum mismatch")]
    ChecksumMismatch,

    #[error("CRC32 mismatch in packet {packet}")]
    CrcMismatch { packet: u32 },

    #[error("corrupt bundle: {reason}")]
    CorruptBundle { reason: String },

    #[error("payload of {size} bytes exceeds max bundle size {max}")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("invalid writer configuration: {0}")]
    InvalidConfig(String),

    #[error("hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch {
        expected: BlobId,
        computed: BlobId,
    },

    #[error("reference to {hash} cannot be resolved by this session")]
    UnresolvableRef { hash: BlobId },

    #[error("export {export} out of range for bundle {bundle}")]
    ExportOutOfRange { bundle: BlobId, export: u32 },

    #[error("import {import} out of range for bundle {bundle}")]
    ImportOutOfRange { bundle: BlobId, import: u32 },

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type BundleResult<T> = Result<T, BundleError>;
