use std::fmt;

use thiserror::Error;

use bale_content::ContentError;
use bale_store::StoreError;
use bale_types::{BlobId, ContentId};

/// Everything a resolve pass failed to verify, in full.
///
/// The resolver never stops at the first failure: `unresolved` names every
/// content id with no mapping and no direct blob, `missing` names every
/// referenced blob absent from the backend. Either list may be empty, and
/// both may be populated in one report, so upstream tooling always sees the
/// complete picture in a single error.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartialResolve {
    /// Content ids that resolved to nothing, as `(namespace, id)`, sorted.
    pub unresolved: Vec<(String, ContentId)>,
    /// Referenced blobs that do not exist in the backend, sorted.
    pub missing: Vec<BlobId>,
}

impl PartialResolve {
    /// Returns `true` if nothing failed.
    pub fn is_empty(&self) -> bool {
        self.unresolved.is_empty() && self.missing.is_empty()
    }
}

impl fmt::Display for PartialResolve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} unresolved content id(s), {} missing blob(s)",
            self.unresolved.len(),
            self.missing.len()
        )?;
        for (ns, id) in &self.unresolved {
            write!(f, "\n  unresolved {ns}/{id}")?;
        }
        for id in &self.missing {
            write!(f, "\n  missing {id}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid resolver configuration: {0}")]
    InvalidConfig(String),

    #[error("object {id} is not a parseable document: {reason}")]
    MalformedDocument { id: BlobId, reason: String },

    /// One or more references failed to verify; carries the complete lists.
    #[error("resolve incomplete: {0}")]
    Incomplete(PartialResolve),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Content(#[from] ContentError),
}

pub type ResolveResult<T> = Result<T, ResolveError>;
