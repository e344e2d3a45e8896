use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use bale_content::ContentIndex;
use bale_store::{BlobStore, StoreError};
use bale_types::{BlobId, ContentId};

use crate::document::{Attachment, Document};
use crate::error::{PartialResolve, ResolveError, ResolveResult};

/// Default bound on concurrent backend lookups.
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Resolver parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Upper bound on in-flight existence checks, content-id resolutions,
    /// and object fetches.
    pub max_concurrency: usize,
}

impl ResolverConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> ResolveResult<()> {
        if self.max_concurrency == 0 {
            return Err(ResolveError::InvalidConfig(
                "max_concurrency must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// The verified output of a resolve pass: every blob transitively reachable
/// from the root, each confirmed to exist.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedSet {
    /// Verified blob ids, sorted. Readers preferring locality should
    /// consume these in order.
    pub blobs: BTreeSet<BlobId>,
}

impl ResolvedSet {
    /// Number of verified blobs.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Returns `true` if nothing was reachable.
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Returns `true` if `id` was verified.
    pub fn contains(&self, id: &BlobId) -> bool {
        self.blobs.contains(id)
    }
}

/// Walks a root document's attachment graph and verifies transitive
/// reachability of every referenced blob.
///
/// All lookups are independent reads over immutable data, so they fan out
/// concurrently up to the configured bound, and every lookup completes
/// before failures are classified — the resolver never stops at the first
/// missing item.
pub struct Resolver {
    store: Arc<dyn BlobStore>,
    content: Arc<ContentIndex>,
    config: ResolverConfig,
}

impl Resolver {
    /// Create a resolver over `store` and `content`.
    pub fn new(
        store: Arc<dyn BlobStore>,
        content: Arc<ContentIndex>,
        config: ResolverConfig,
    ) -> ResolveResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            content,
            config,
        })
    }

    /// Resolve the graph rooted at `root`.
    ///
    /// On success, returns the full set of verified existing blobs. If any
    /// content id fails to resolve or any referenced blob is absent, fails
    /// with [`ResolveError::Incomplete`] listing *every* offender of both
    /// kinds.
    pub async fn resolve(&self, root: &Document) -> ResolveResult<ResolvedSet> {
        let mut verified: BTreeSet<BlobId> = BTreeSet::new();
        let mut missing: BTreeSet<BlobId> = BTreeSet::new();

        // Attachments gathered while walking documents.
        let mut blob_checks: BTreeSet<BlobId> = BTreeSet::new();
        let mut cid_tasks: Vec<(String, ContentId)> = Vec::new();
        let mut seen_cids: HashSet<(String, ContentId)> = HashSet::new();

        // Walk the object graph breadth-first, fetching each document once.
        let mut visited: HashSet<BlobId> = HashSet::new();
        let mut frontier: VecDeque<BlobId> = VecDeque::new();
        let collect = |doc: &Document,
                           frontier: &mut VecDeque<BlobId>,
                           visited: &mut HashSet<BlobId>,
                           blob_checks: &mut BTreeSet<BlobId>,
                           cid_tasks: &mut Vec<(String, ContentId)>,
                           seen_cids: &mut HashSet<(String, ContentId)>| {
            for attachment in &doc.attachments {
                match attachment {
                    Attachment::Blob(id) => {
                        blob_checks.insert(*id);
                    }
                    Attachment::Object(id) => {
                        if visited.insert(*id) {
                            frontier.push_back(*id);
                        }
                    }
                    Attachment::ContentId { ns, id } => {
                        if seen_cids.insert((ns.clone(), *id)) {
                            cid_tasks.push((ns.clone(), *id));
                        }
                    }
                }
            }
        };
        collect(
            root,
            &mut frontier,
            &mut visited,
            &mut blob_checks,
            &mut cid_tasks,
            &mut seen_cids,
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));

        while !frontier.is_empty() {
            let mut fetches: JoinSet<(BlobId, Result<Vec<u8>, StoreError>)> = JoinSet::new();
            for id in frontier.drain(..) {
                let store = self.store.clone();
                let semaphore = semaphore.clone();
                fetches.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("semaphore never closed");
                    (id, store.read_blob(&id, None).await)
                });
            }
            while let Some(joined) = fetches.join_next().await {
                let (id, fetched) = joined.expect("resolver task panicked");
                match fetched {
                    Ok(bytes) => {
                        let doc = Document::from_bytes(&id, &bytes)?;
                        verified.insert(id);
                        collect(
                            &doc,
                            &mut frontier,
                            &mut visited,
                            &mut blob_checks,
                            &mut cid_tasks,
                            &mut seen_cids,
                        );
                    }
                    // A missing object is collected like any missing blob.
                    Err(StoreError::NotFound(_)) => {
                        missing.insert(id);
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        // Resolve every content id; unresolved ones are collected, and
        // resolved targets join the existence checks.
        let mut unresolved: Vec<(String, ContentId)> = Vec::new();
        let mut resolutions: JoinSet<(String, ContentId, _)> = JoinSet::new();
        for (ns, id) in cid_tasks {
            let content = self.content.clone();
            let semaphore = semaphore.clone();
            resolutions.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                let resolved = content.resolve(&ns, &id, false).await;
                (ns, id, resolved)
            });
        }
        while let Some(joined) = resolutions.join_next().await {
            let (ns, id, resolved) = joined.expect("resolver task panicked");
            match resolved {
                Ok(Some(blobs)) => {
                    // A chunked logical object names several physical
                    // blobs; all of them must exist.
                    blob_checks.extend(blobs);
                }
                Ok(None) => unresolved.push((ns, id)),
                Err(err) => return Err(err.into()),
            }
        }

        // Existence-check everything that is not already verified.
        let mut checks: JoinSet<(BlobId, Result<bool, StoreError>)> = JoinSet::new();
        for id in blob_checks {
            if verified.contains(&id) {
                continue;
            }
            let store = self.store.clone();
            let semaphore = semaphore.clone();
            checks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                (id, store.blob_exists(&id).await)
            });
        }
        while let Some(joined) = checks.join_next().await {
            let (id, exists) = joined.expect("resolver task panicked");
            match exists {
                Ok(true) => {
                    verified.insert(id);
                }
                Ok(false) => {
                    missing.insert(id);
                }
                Err(err) => return Err(err.into()),
            }
        }

        unresolved.sort();
        debug!(
            verified = verified.len(),
            missing = missing.len(),
            unresolved = unresolved.len(),
            "resolve pass complete"
        );

        if unresolved.is_empty() && missing.is_empty() {
            Ok(ResolvedSet { blobs: verified })
        } else {
            Err(ResolveError::Incomplete(PartialResolve {
                unresolved,
                missing: missing.into_iter().collect(),
            }))
        }
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("max_concurrency", &self.config.max_concurrency)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bale_store::{AliasRecord, MemoryBlobStore, RefTarget, StoreResult};

    struct Fixture {
        store: Arc<MemoryBlobStore>,
        resolver: Resolver,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryBlobStore::new());
        let content = Arc::new(ContentIndex::new(store.clone()));
        let resolver =
            Resolver::new(store.clone(), content, ResolverConfig::default()).unwrap();
        Fixture { store, resolver }
    }

    async fn store_blob(store: &MemoryBlobStore, data: &[u8]) -> BlobId {
        store.write_blob(data).await.unwrap()
    }

    async fn store_document(store: &MemoryBlobStore, doc: &Document) -> BlobId {
        store.write_blob(&doc.to_bytes().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn valid_graph_verifies_every_blob() {
        let f = fixture();
        let blob_a = store_blob(&f.store, b"blob a").await;
        let blob_b = store_blob(&f.store, b"blob b").await;

        let inner = Document::new().attach(Attachment::Blob(blob_b));
        let inner_id = store_document(&f.store, &inner).await;

        let root = Document::new()
            .attach(Attachment::Blob(blob_a))
            .attach(Attachment::Object(inner_id));

        let resolved = f.resolver.resolve(&root).await.unwrap();
        assert_eq!(resolved.len(), 3);
        for id in [blob_a, blob_b, inner_id] {
            assert!(resolved.contains(&id));
        }
    }

    #[tokio::test]
    async fn missing_blobs_are_all_reported() {
        let f = fixture();
        let present = store_blob(&f.store, b"present").await;
        let absent_1 = BlobId::from_bytes(b"never stored 1");
        let absent_2 = BlobId::from_bytes(b"never stored 2");

        let root = Document::new()
            .attach(Attachment::Blob(present))
            .attach(Attachment::Blob(absent_1))
            .attach(Attachment::Blob(absent_2));

        let err = f.resolver.resolve(&root).await.unwrap_err();
        let ResolveError::Incomplete(report) = err else {
            panic!("expected Incomplete");
        };
        let mut expected = vec![absent_1, absent_2];
        expected.sort();
        assert_eq!(report.missing, expected);
        assert!(report.unresolved.is_empty());
    }

    #[tokio::test]
    async fn unresolved_content_ids_are_all_reported() {
        let f = fixture();
        let ghost_1 = ContentId::from_bytes(b"no mapping 1");
        let ghost_2 = ContentId::from_bytes(b"no mapping 2");

        let root = Document::new()
            .attach(Attachment::ContentId {
                ns: "main".into(),
                id: ghost_1,
            })
            .attach(Attachment::ContentId {
                ns: "main".into(),
                id: ghost_2,
            });

        let err = f.resolver.resolve(&root).await.unwrap_err();
        let ResolveError::Incomplete(report) = err else {
            panic!("expected Incomplete");
        };
        assert_eq!(report.unresolved.len(), 2);
        assert!(report.missing.is_empty());
        let ids: Vec<ContentId> = report.unresolved.iter().map(|(_, id)| *id).collect();
        assert!(ids.contains(&ghost_1) && ids.contains(&ghost_2));
    }

    #[tokio::test]
    async fn both_failure_kinds_reported_together() {
        let f = fixture();
        let absent = BlobId::from_bytes(b"gone");
        let ghost = ContentId::from_bytes(b"unmapped");

        let root = Document::new()
            .attach(Attachment::Blob(absent))
            .attach(Attachment::ContentId {
                ns: "main".into(),
                id: ghost,
            });

        let err = f.resolver.resolve(&root).await.unwrap_err();
        let ResolveError::Incomplete(report) = err else {
            panic!("expected Incomplete");
        };
        assert_eq!(report.missing, vec![absent]);
        assert_eq!(report.unresolved, vec![("main".to_string(), ghost)]);
    }

    #[tokio::test]
    async fn content_id_fallback_verifies_direct_blob() {
        let f = fixture();
        let content = b"stored whole, never mapped".to_vec();
        let blob = store_blob(&f.store, &content).await;
        let cid = ContentId::from_bytes(&content);

        let root = Document::new().attach(Attachment::ContentId {
            ns: "main".into(),
            id: cid,
        });

        let resolved = f.resolver.resolve(&root).await.unwrap();
        assert!(resolved.contains(&blob));
    }

    #[tokio::test]
    async fn chunked_content_id_checks_every_chunk() {
        let f = fixture();
        let chunk_a = store_blob(&f.store, b"chunk a").await;
        let chunk_b = store_blob(&f.store, b"chunk b").await;
        let chunk_gone = BlobId::from_bytes(b"chunk never written");

        let cid = ContentId::from_bytes(b"the logical whole");
        let content = ContentIndex::new(f.store.clone());
        content
            .put("main", &cid, &[chunk_a, chunk_gone, chunk_b], 1)
            .await
            .unwrap();

        let root = Document::new().attach(Attachment::ContentId {
            ns: "main".into(),
            id: cid,
        });

        let err = f.resolver.resolve(&root).await.unwrap_err();
        let ResolveError::Incomplete(report) = err else {
            panic!("expected Incomplete");
        };
        assert_eq!(report.missing, vec![chunk_gone]);
    }

    #[tokio::test]
    async fn missing_object_is_collected_not_thrown() {
        let f = fixture();
        let gone = BlobId::from_bytes(b"document never stored");
        let present = store_blob(&f.store, b"still here").await;

        let root = Document::new()
            .attach(Attachment::Object(gone))
            .attach(Attachment::Blob(present));

        let err = f.resolver.resolve(&root).await.unwrap_err();
        let ResolveError::Incomplete(report) = err else {
            panic!("expected Incomplete");
        };
        assert_eq!(report.missing, vec![gone]);
    }

    #[tokio::test]
    async fn malformed_object_is_an_error() {
        let f = fixture();
        let junk = store_blob(&f.store, b"definitely not a document").await;
        let root = Document::new().attach(Attachment::Object(junk));

        let err = f.resolver.resolve(&root).await.unwrap_err();
        assert!(matches!(err, ResolveError::MalformedDocument { id, .. } if id == junk));
    }

    /// Store wrapper counting blob reads, to observe fetch deduplication.
    struct CountingStore {
        inner: MemoryBlobStore,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl BlobStore for CountingStore {
        async fn write_blob(&self, bytes: &[u8]) -> StoreResult<BlobId> {
            self.inner.write_blob(bytes).await
        }
        async fn read_blob(&self, id: &BlobId, range: Option<(u64, u64)>) -> StoreResult<Vec<u8>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read_blob(id, range).await
        }
        async fn blob_exists(&self, id: &BlobId) -> StoreResult<bool> {
            self.inner.blob_exists(id).await
        }
        async fn find_alias(&self, name: &str) -> StoreResult<Option<AliasRecord>> {
            self.inner.find_alias(name).await
        }
        async fn add_alias(
            &self,
            name: &str,
            target: BlobId,
            weight: u32,
            data: Option<Vec<u8>>,
        ) -> StoreResult<()> {
            self.inner.add_alias(name, target, weight, data).await
        }
        async fn remove_alias(&self, name: &str, target: &BlobId) -> StoreResult<bool> {
            self.inner.remove_alias(name, target).await
        }
        async fn list_aliases(&self, prefix: &str) -> StoreResult<Vec<(String, AliasRecord)>> {
            self.inner.list_aliases(prefix).await
        }
        async fn write_ref(&self, name: &str, target: RefTarget) -> StoreResult<()> {
            self.inner.write_ref(name, target).await
        }
        async fn read_ref(&self, name: &str) -> StoreResult<Option<RefTarget>> {
            self.inner.read_ref(name).await
        }
        async fn list_refs(&self, prefix: &str) -> StoreResult<Vec<(String, RefTarget)>> {
            self.inner.list_refs(prefix).await
        }
    }

    #[tokio::test]
    async fn shared_objects_are_fetched_once() {
        let store = Arc::new(CountingStore {
            inner: MemoryBlobStore::new(),
            reads: AtomicUsize::new(0),
        });
        let content = Arc::new(ContentIndex::new(store.clone()));
        let resolver =
            Resolver::new(store.clone(), content, ResolverConfig::default()).unwrap();

        let shared = Document::new();
        let shared_id = store
            .write_blob(&shared.to_bytes().unwrap())
            .await
            .unwrap();

        // Two paths to the same object.
        let left = Document::new().attach(Attachment::Object(shared_id));
        let left_id = store.write_blob(&left.to_bytes().unwrap()).await.unwrap();
        let right = Document::new().attach(Attachment::Object(shared_id));
        let right_id = store.write_blob(&right.to_bytes().unwrap()).await.unwrap();

        let root = Document::new()
            .attach(Attachment::Object(left_id))
            .attach(Attachment::Object(right_id));

        let resolved = resolver.resolve(&root).await.unwrap();
        assert_eq!(resolved.len(), 3);
        // left + right + shared: exactly three document fetches.
        assert_eq!(store.reads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_document_resolves_to_empty_set() {
        let f = fixture();
        let resolved = f.resolver.resolve(&Document::new()).await.unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn zero_concurrency_is_rejected() {
        let f = fixture();
        let content = Arc::new(ContentIndex::new(f.store.clone()));
        let err = Resolver::new(
            f.store.clone(),
            content,
            ResolverConfig { max_concurrency: 0 },
        );
        assert!(matches!(err, Err(ResolveError::InvalidConfig(_))));
    }
}
