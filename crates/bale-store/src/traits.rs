use async_trait::async_trait;

use bale_types::BlobId;

use crate::alias::{AliasRecord, RefTarget};
use crate::error::StoreResult;

/// Content-addressed backend blob store.
///
/// All implementations must satisfy these invariants:
/// - Blobs are immutable once written. Re-writing identical bytes under the
///   same content hash is a safe no-op, which makes concurrent writers from
///   independent sessions safe.
/// - Concurrent reads are always safe (blobs are immutable).
/// - Refs are the only mutable state: writing a ref atomically replaces the
///   previous target, with no read-modify-write imposed on callers.
/// - All I/O errors are propagated, never silently ignored; retry policy
///   belongs to the caller.
/// - Every operation is cancel-safe: dropping its future abandons the
///   in-flight work without leaving partial state visible to readers.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write a blob and return its content-keyed locator.
    async fn write_blob(&self, bytes: &[u8]) -> StoreResult<BlobId>;

    /// Read a blob, optionally restricted to an `(offset, length)` range.
    ///
    /// Returns `NotFound` if the blob does not exist and `InvalidRange` if
    /// the range starts beyond the end of the blob. A range extending past
    /// the end is truncated.
    async fn read_blob(&self, id: &BlobId, range: Option<(u64, u64)>) -> StoreResult<Vec<u8>>;

    /// Check whether a blob exists.
    async fn blob_exists(&self, id: &BlobId) -> StoreResult<bool>;

    /// Look up the preferred alias record for a name.
    ///
    /// Returns `Ok(None)` if no record exists. When several records exist,
    /// the winner is picked by [`AliasRecord::preferred`].
    async fn find_alias(&self, name: &str) -> StoreResult<Option<AliasRecord>>;

    /// Add (or strengthen) an alias record under a name.
    ///
    /// If a record for the same `(name, target)` pair already exists, the
    /// stored weight becomes the maximum of old and new, and `data` is
    /// replaced when provided.
    async fn add_alias(
        &self,
        name: &str,
        target: BlobId,
        weight: u32,
        data: Option<Vec<u8>>,
    ) -> StoreResult<()>;

    /// Remove the alias record for a specific `(name, target)` pair.
    ///
    /// Returns `Ok(true)` if a record existed and was removed.
    async fn remove_alias(&self, name: &str, target: &BlobId) -> StoreResult<bool>;

    /// Enumerate all alias records whose name starts with `prefix`.
    ///
    /// Pass `""` to list everything. This is the surface an external
    /// garbage collector walks.
    async fn list_aliases(&self, prefix: &str) -> StoreResult<Vec<(String, AliasRecord)>>;

    /// Atomically point a named ref at a new target.
    async fn write_ref(&self, name: &str, target: RefTarget) -> StoreResult<()>;

    /// Read a named ref. Returns `Ok(None)` if it has never been written.
    async fn read_ref(&self, name: &str) -> StoreResult<Option<RefTarget>>;

    /// Enumerate all refs whose name starts with `prefix`.
    async fn list_refs(&self, prefix: &str) -> StoreResult<Vec<(String, RefTarget)>>;
}
