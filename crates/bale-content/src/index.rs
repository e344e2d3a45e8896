use std::sync::Arc;

use tracing::debug;

use bale_store::BlobStore;
use bale_types::{BlobId, ContentId};

use crate::error::{ContentError, ContentResult};

/// Alias name prefix for all content mappings.
const ALIAS_PREFIX: &str = "content";

/// Validate a namespace: non-empty, `[a-zA-Z0-9._-]` only.
///
/// Namespaces become path segments of alias names, so separators are
/// excluded to keep prefix enumeration unambiguous.
fn validate_namespace(ns: &str) -> ContentResult<()> {
    if ns.is_empty()
        || !ns
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(ContentError::InvalidNamespace(ns.to_string()));
    }
    Ok(())
}

/// Alias name for one content id in one namespace.
fn alias_name(ns: &str, content_id: &ContentId) -> String {
    format!("{ALIAS_PREFIX}/{ns}/{}", content_id.to_hex())
}

/// Weighted mapping from logical content ids to the physical blob(s) that
/// materialize them.
///
/// Access control happens in an external collaborator before calls arrive
/// here; this layer only performs the indirection.
pub struct ContentIndex {
    store: Arc<dyn BlobStore>,
}

impl ContentIndex {
    /// Create an index over `store`.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Register (or strengthen) a mapping from `content_id` to the blob
    /// sequence that materializes it.
    ///
    /// `blobs` is the full physical sequence — a single blob for whole
    /// objects, the ordered chunk blobs for chunked ones. The alias target
    /// is the first blob; the full sequence rides in the record payload.
    /// Repeated puts with different weights pick the winner by weight,
    /// ties breaking toward the smallest target id.
    pub async fn put(
        &self,
        ns: &str,
        content_id: &ContentId,
        blobs: &[BlobId],
        weight: u32,
    ) -> ContentResult<()> {
        validate_namespace(ns)?;
        let Some(first) = blobs.first() else {
            return Err(ContentError::EmptySequence);
        };
        let data = if blobs.len() > 1 {
            Some(
                bincode::serialize(blobs)
                    .map_err(|e| ContentError::Serialization(e.to_string()))?,
            )
        } else {
            None
        };
        self.store
            .add_alias(&alias_name(ns, content_id), *first, weight, data)
            .await?;
        debug!(
            ns,
            content_id = %content_id.short_hex(),
            blobs = blobs.len(),
            weight,
            "content mapping put"
        );
        Ok(())
    }

    /// Resolve a content id to its physical blob sequence.
    ///
    /// Returns the mapped sequence when one exists. With no mapping and
    /// `must_be_content_id = false`, the content id's own hash is tried as
    /// a direct blob id (content ids and blob ids share a hash namespace);
    /// the fallback only applies if that blob actually exists. "Not found"
    /// is `Ok(None)`, a value — callers that require resolution use
    /// [`resolve_required`].
    ///
    /// [`resolve_required`]: ContentIndex::resolve_required
    pub async fn resolve(
        &self,
        ns: &str,
        content_id: &ContentId,
        must_be_content_id: bool,
    ) -> ContentResult<Option<Vec<BlobId>>> {
        validate_namespace(ns)?;
        if let Some(record) = self.store.find_alias(&alias_name(ns, content_id)).await? {
            let blobs = match &record.data {
                Some(data) => bincode::deserialize(data)
                    .map_err(|e| ContentError::Serialization(e.to_string()))?,
                None => vec![record.target],
            };
            return Ok(Some(blobs));
        }
        if must_be_content_id {
            return Ok(None);
        }
        let direct = content_id.as_blob_id();
        if self.store.blob_exists(&direct).await? {
            return Ok(Some(vec![direct]));
        }
        Ok(None)
    }

    /// Resolve, treating an unresolved content id as an error.
    ///
    /// For dependents that cannot proceed without a resolution, such as
    /// finalizing a ref.
    pub async fn resolve_required(
        &self,
        ns: &str,
        content_id: &ContentId,
    ) -> ContentResult<Vec<BlobId>> {
        self.resolve(ns, content_id, false)
            .await?
            .ok_or_else(|| ContentError::NotFound {
                ns: ns.to_string(),
                content_id: *content_id,
            })
    }
}

impl std::fmt::Debug for ContentIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentIndex").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bale_store::MemoryBlobStore;

    fn index() -> (Arc<MemoryBlobStore>, ContentIndex) {
        let store = Arc::new(MemoryBlobStore::new());
        let idx = ContentIndex::new(store.clone());
        (store, idx)
    }

    #[tokio::test]
    async fn put_then_resolve_single_blob() {
        let (_, idx) = index();
        let cid = ContentId::from_bytes(b"logical content");
        let blob = BlobId::from_bytes(b"physical representation");

        idx.put("main", &cid, &[blob], 1).await.unwrap();
        let resolved = idx.resolve("main", &cid, true).await.unwrap();
        assert_eq!(resolved, Some(vec![blob]));
    }

    #[tokio::test]
    async fn chunked_sequence_resolves_to_all_blobs() {
        let (_, idx) = index();
        let cid = ContentId::from_bytes(b"large chunked object");
        let chunks: Vec<BlobId> = (0u8..4).map(|i| BlobId::from_hash([i; 32])).collect();

        idx.put("main", &cid, &chunks, 1).await.unwrap();
        let resolved = idx.resolve("main", &cid, true).await.unwrap().unwrap();
        assert_eq!(resolved, chunks);
    }

    #[tokio::test]
    async fn fallback_to_own_hash_when_blob_exists() {
        let (store, idx) = index();
        // Store the content whole; never register a mapping.
        let content = b"un-chunked object".to_vec();
        let blob = store.write_blob(&content).await.unwrap();
        let cid = ContentId::from_bytes(&content);

        let resolved = idx.resolve("main", &cid, false).await.unwrap();
        assert_eq!(resolved, Some(vec![blob]));
    }

    #[tokio::test]
    async fn no_fallback_without_backing_blob() {
        let (_, idx) = index();
        let cid = ContentId::from_bytes(b"nothing stored");
        let resolved = idx.resolve("main", &cid, false).await.unwrap();
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn must_be_content_id_suppresses_fallback() {
        let (store, idx) = index();
        let content = b"stored whole".to_vec();
        store.write_blob(&content).await.unwrap();
        let cid = ContentId::from_bytes(&content);

        // The blob exists, but the caller insisted on a real mapping.
        let resolved = idx.resolve("main", &cid, true).await.unwrap();
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn heavier_put_wins() {
        let (_, idx) = index();
        let cid = ContentId::from_bytes(b"contended");
        let light = BlobId::from_hash([1; 32]);
        let heavy = BlobId::from_hash([2; 32]);

        idx.put("main", &cid, &[light], 1).await.unwrap();
        idx.put("main", &cid, &[heavy], 10).await.unwrap();

        let resolved = idx.resolve("main", &cid, true).await.unwrap();
        assert_eq!(resolved, Some(vec![heavy]));
    }

    #[tokio::test]
    async fn weight_tie_break_is_deterministic() {
        let (_, idx) = index();
        let cid = ContentId::from_bytes(b"tied");
        let small = BlobId::from_hash([3; 32]);
        let large = BlobId::from_hash([9; 32]);

        // Same weight, either insertion order: the smaller id wins.
        idx.put("main", &cid, &[large], 5).await.unwrap();
        idx.put("main", &cid, &[small], 5).await.unwrap();
        assert_eq!(
            idx.resolve("main", &cid, true).await.unwrap(),
            Some(vec![small])
        );

        let (_, idx2) = index();
        idx2.put("main", &cid, &[small], 5).await.unwrap();
        idx2.put("main", &cid, &[large], 5).await.unwrap();
        assert_eq!(
            idx2.resolve("main", &cid, true).await.unwrap(),
            Some(vec![small])
        );
    }

    #[tokio::test]
    async fn repeated_put_keeps_max_weight() {
        let (_, idx) = index();
        let cid = ContentId::from_bytes(b"strengthened");
        let preferred = BlobId::from_hash([1; 32]);
        let challenger = BlobId::from_hash([2; 32]);

        idx.put("main", &cid, &[preferred], 10).await.unwrap();
        // Weakening re-put of the same target does not demote it.
        idx.put("main", &cid, &[preferred], 1).await.unwrap();
        idx.put("main", &cid, &[challenger], 5).await.unwrap();

        assert_eq!(
            idx.resolve("main", &cid, true).await.unwrap(),
            Some(vec![preferred])
        );
    }

    #[tokio::test]
    async fn resolve_required_errors_on_missing() {
        let (_, idx) = index();
        let cid = ContentId::from_bytes(b"mandatory but missing");
        let err = idx.resolve_required("main", &cid).await.unwrap_err();
        assert!(matches!(err, ContentError::NotFound { .. }));
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let (_, idx) = index();
        let cid = ContentId::from_bytes(b"scoped");
        let blob = BlobId::from_hash([7; 32]);

        idx.put("ns-a", &cid, &[blob], 1).await.unwrap();
        assert!(idx.resolve("ns-b", &cid, true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_namespace_is_rejected() {
        let (_, idx) = index();
        let cid = ContentId::from_bytes(b"x");
        for ns in ["", "has/slash", "has space"] {
            let err = idx.put(ns, &cid, &[BlobId::from_hash([1; 32])], 1).await;
            assert!(matches!(err, Err(ContentError::InvalidNamespace(_))), "{ns:?}");
        }
    }

    #[tokio::test]
    async fn empty_sequence_is_rejected() {
        let (_, idx) = index();
        let cid = ContentId::from_bytes(b"x");
        let err = idx.put("main", &cid, &[], 1).await.unwrap_err();
        assert!(matches!(err, ContentError::EmptySequence));
    }
}
