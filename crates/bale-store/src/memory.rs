use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use bale_types::BlobId;

use crate::alias::{AliasRecord, RefTarget};
use crate::error::{StoreError, StoreResult};
use crate::traits::BlobStore;

/// In-memory, HashMap-based blob store.
///
/// Intended for tests and embedding. All state lives behind `RwLock`s; data
/// is lost when the store is dropped. Blob reads re-verify the content hash
/// so corruption (however it happens) surfaces as `HashMismatch` instead of
/// silently wrong bytes.
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<BlobId, Vec<u8>>>,
    aliases: RwLock<HashMap<String, Vec<AliasRecord>>>,
    refs: RwLock<HashMap<String, RefTarget>>,
}

impl MemoryBlobStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
            refs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    /// Returns `true` if no blobs are stored.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored blobs.
    pub fn total_bytes(&self) -> u64 {
        self.blobs
            .read()
            .expect("lock poisoned")
            .values()
            .map(|bytes| bytes.len() as u64)
            .sum()
    }

    /// Sorted list of all blob ids in the store.
    pub fn all_ids(&self) -> Vec<BlobId> {
        let map = self.blobs.read().expect("lock poisoned");
        let mut ids: Vec<BlobId> = map.keys().copied().collect();
        ids.sort();
        ids
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn write_blob(&self, bytes: &[u8]) -> StoreResult<BlobId> {
        let id = BlobId::from_bytes(bytes);
        let mut map = self.blobs.write().expect("lock poisoned");
        // Idempotent: identical content always maps to the same id.
        map.entry(id).or_insert_with(|| bytes.to_vec());
        Ok(id)
    }

    async fn read_blob(&self, id: &BlobId, range: Option<(u64, u64)>) -> StoreResult<Vec<u8>> {
        let map = self.blobs.read().expect("lock poisoned");
        let bytes = map.get(id).ok_or(StoreError::NotFound(*id))?;

        let computed = BlobId::from_bytes(bytes);
        if computed != *id {
            return Err(StoreError::HashMismatch { id: *id, computed });
        }

        match range {
            None => Ok(bytes.clone()),
            Some((offset, length)) => {
                let actual = bytes.len() as u64;
                if offset > actual {
                    return Err(StoreError::InvalidRange {
                        id: *id,
                        offset,
                        length,
                        actual,
                    });
                }
                let end = actual.min(offset + length);
                Ok(bytes[offset as usize..end as usize].to_vec())
            }
        }
    }

    async fn blob_exists(&self, id: &BlobId) -> StoreResult<bool> {
        let map = self.blobs.read().expect("lock poisoned");
        Ok(map.contains_key(id))
    }

    async fn find_alias(&self, name: &str) -> StoreResult<Option<AliasRecord>> {
        let map = self.aliases.read().expect("lock poisoned");
        let records = match map.get(name) {
            Some(records) => records,
            None => return Ok(None),
        };
        Ok(records
            .iter()
            .max_by(|a, b| a.preferred(b))
            .cloned())
    }

    async fn add_alias(
        &self,
        name: &str,
        target: BlobId,
        weight: u32,
        data: Option<Vec<u8>>,
    ) -> StoreResult<()> {
        let mut map = self.aliases.write().expect("lock poisoned");
        let records = map.entry(name.to_string()).or_default();
        if let Some(existing) = records.iter_mut().find(|r| r.target == target) {
            // Strengthen: keep the maximum weight seen for this pair.
            existing.weight = existing.weight.max(weight);
            if data.is_some() {
                existing.data = data;
            }
        } else {
            records.push(AliasRecord {
                target,
                weight,
                data,
            });
        }
        debug!(name, target = %target.short_hex(), weight, "alias added");
        Ok(())
    }

    async fn remove_alias(&self, name: &str, target: &BlobId) -> StoreResult<bool> {
        let mut map = self.aliases.write().expect("lock poisoned");
        let Some(records) = map.get_mut(name) else {
            return Ok(false);
        };
        let before = records.len();
        records.retain(|r| r.target != *target);
        let removed = records.len() != before;
        if records.is_empty() {
            map.remove(name);
        }
        Ok(removed)
    }

    async fn list_aliases(&self, prefix: &str) -> StoreResult<Vec<(String, AliasRecord)>> {
        let map = self.aliases.read().expect("lock poisoned");
        let mut out: Vec<(String, AliasRecord)> = map
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .flat_map(|(name, records)| {
                records.iter().map(move |r| (name.clone(), r.clone()))
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    async fn write_ref(&self, name: &str, target: RefTarget) -> StoreResult<()> {
        let mut map = self.refs.write().expect("lock poisoned");
        map.insert(name.to_string(), target);
        debug!(name, bundle = %target.bundle.short_hex(), export = target.export, "ref updated");
        Ok(())
    }

    async fn read_ref(&self, name: &str) -> StoreResult<Option<RefTarget>> {
        let map = self.refs.read().expect("lock poisoned");
        Ok(map.get(name).copied())
    }

    async fn list_refs(&self, prefix: &str) -> StoreResult<Vec<(String, RefTarget)>> {
        let map = self.refs.read().expect("lock poisoned");
        let mut out: Vec<(String, RefTarget)> = map
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, target)| (name.clone(), *target))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

impl std::fmt::Debug for MemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBlobStore")
            .field("blob_count", &self.len())
            .finish()
    }
}
