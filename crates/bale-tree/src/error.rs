use thiserror::Error;

use bale_bundle::BundleError;
use bale_types::BlobId;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("invalid tree configuration: {0}")]
    InvalidConfig(String),

    #[error("corrupt tree node: {reason}")]
    CorruptNode { reason: String },

    #[error("unsupported interior node version: {0}")]
    UnsupportedNodeVersion(u16),

    #[error("child hash mismatch: node references {expected}, export holds {actual}")]
    ChildHashMismatch { expected: BlobId, actual: BlobId },

    #[error(transparent)]
    Bundle(#[from] BundleError),
}

pub type TreeResult<T> = Result<T, TreeError>;
