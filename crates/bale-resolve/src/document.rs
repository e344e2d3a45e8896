use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use bale_types::{BlobId, ContentId};

use crate::error::{ResolveError, ResolveResult};

/// One attachment field of a structured payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attachment {
    /// A plain blob: existence-checked, never parsed.
    Blob(BlobId),
    /// Another structured payload: fetched, parsed, and recursed into.
    Object(BlobId),
    /// A logical content identity resolved through the content index to
    /// one or more physical blobs.
    ContentId {
        /// Content-index namespace to resolve in.
        ns: String,
        /// The logical content hash.
        id: ContentId,
    },
}

/// A structured payload with attachment fields.
///
/// Documents are immutable and content-addressed like everything else, so
/// the graph they span is acyclic by construction; shared subgraphs are
/// still deduplicated during resolution.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// References to other stored data.
    pub attachments: Vec<Attachment>,
    /// Free-form metadata carried alongside the attachments.
    pub meta: BTreeMap<String, String>,
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attachment.
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Serialize for storage.
    pub fn to_bytes(&self) -> ResolveResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ResolveError::MalformedDocument {
            id: BlobId::null(),
            reason: e.to_string(),
        })
    }

    /// Parse a stored object payload fetched from `id`.
    pub fn from_bytes(id: &BlobId, data: &[u8]) -> ResolveResult<Self> {
        serde_json::from_slice(data).map_err(|e| ResolveError::MalformedDocument {
            id: *id,
            reason: e.to_string(),
        })
    }
}
