use thiserror::Error;

use bale_store::StoreError;
use bale_types::ContentId;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("content id {content_id} not resolvable in namespace {ns}")]
    NotFound { ns: String, content_id: ContentId },

    #[error("invalid namespace {0:?}")]
    InvalidNamespace(String),

    #[error("content mapping must name at least one blob")]
    EmptySequence,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ContentResult<T> = Result<T, ContentError>;
