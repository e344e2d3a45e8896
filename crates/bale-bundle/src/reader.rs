use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tracing::trace;

use bale_store::{BlobStore, RefTarget};
use bale_types::BlobId;

use crate::error::{BundleError, BundleResult};
use crate::format::{Bundle, ExportEntry, ExportRef};
use crate::handle::FlushedLocation;

impl From<RefTarget> for FlushedLocation {
    fn from(target: RefTarget) -> Self {
        Self {
            bundle: target.bundle,
            export: target.export,
        }
    }
}

/// A decoded bundle plus its derived export placement index.
#[derive(Debug)]
pub struct DecodedBundle {
    bundle: Bundle,
    /// Per export: (packet index, offset within the decoded packet).
    placements: Vec<(usize, u64)>,
}

impl DecodedBundle {
    /// The decoded header and packet bytes.
    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    /// Placement of export `index`.
    pub fn placement(&self, index: u32) -> Option<(usize, u64)> {
        self.placements.get(index as usize).copied()
    }
}

/// Bounded map evicting the oldest insertion once full.
struct BoundedCache<K, V> {
    capacity: usize,
    map: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V: Clone> BoundedCache<K, V> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        self.map.get(key).cloned()
    }

    fn insert(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        if self.map.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }
        while self.map.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
    }
}

/// Read-side access to sealed bundles.
///
/// Fetches bundle bytes through the store, decodes them, and serves export
/// payloads by decompressing the containing packet. Decoded bundles and
/// packets are held in explicit bounded caches injected at construction —
/// there is no process-wide cache state.
pub struct BundleSource {
    store: Arc<dyn BlobStore>,
    bundles: Mutex<BoundedCache<BlobId, Arc<DecodedBundle>>>,
    packets: Mutex<BoundedCache<(BlobId, u32), Arc<Vec<u8>>>>,
}

impl BundleSource {
    /// Create a source over `store` caching up to `cache_capacity` decoded
    /// bundles and packets each. A capacity of zero disables caching.
    pub fn new(store: Arc<dyn BlobStore>, cache_capacity: usize) -> Self {
        Self {
            store,
            bundles: Mutex::new(BoundedCache::new(cache_capacity)),
            packets: Mutex::new(BoundedCache::new(cache_capacity)),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Fetch and decode a bundle by locator.
    pub async fn bundle(&self, id: &BlobId) -> BundleResult<Arc<DecodedBundle>> {
        if let Some(cached) = self.bundles.lock().expect("lock poisoned").get(id) {
            return Ok(cached);
        }
        let bytes = self.store.read_blob(id, None).await?;
        let bundle = Bundle::decode(&bytes)?;
        let placements = bundle.export_placements()?;
        let decoded = Arc::new(DecodedBundle { bundle, placements });
        self.bundles
            .lock()
            .expect("lock poisoned")
            .insert(*id, decoded.clone());
        trace!(bundle = %id.short_hex(), "bundle decoded");
        Ok(decoded)
    }

    /// Decoded bytes of packet `index` within bundle `id`.
    pub async fn packet(&self, id: &BlobId, index: u32) -> BundleResult<Arc<Vec<u8>>> {
        let key = (*id, index);
        if let Some(cached) = self.packets.lock().expect("lock poisoned").get(&key) {
            return Ok(cached);
        }
        let decoded_bundle = self.bundle(id).await?;
        let bundle = decoded_bundle.bundle();
        let entry = bundle
            .packets
            .get(index as usize)
            .copied()
            .ok_or_else(|| BundleError::CorruptBundle {
                reason: format!("packet {index} out of range"),
            })?;
        let (start, end) = bundle
            .packet_range(index as usize)
            .expect("range checked above");
        let encoded = &bundle.packet_bytes[start..end];

        if crc32fast::hash(encoded) != entry.crc32 {
            return Err(BundleError::CrcMismatch { packet: index });
        }
        let decoded = Arc::new(entry.format.decode(encoded, entry.decoded_len)?);
        self.packets
            .lock()
            .expect("lock poisoned")
            .insert(key, decoded.clone());
        Ok(decoded)
    }

    /// The export table entry at a flushed location.
    pub async fn export_entry(&self, location: &FlushedLocation) -> BundleResult<ExportEntry> {
        let decoded = self.bundle(&location.bundle).await?;
        decoded
            .bundle()
            .exports
            .get(location.export as usize)
            .cloned()
            .ok_or(BundleError::ExportOutOfRange {
                bundle: location.bundle,
                export: location.export,
            })
    }

    /// Read an export's payload bytes, verifying its content hash.
    pub async fn read_export(&self, location: &FlushedLocation) -> BundleResult<Vec<u8>> {
        let decoded = self.bundle(&location.bundle).await?;
        let entry = decoded
            .bundle()
            .exports
            .get(location.export as usize)
            .ok_or(BundleError::ExportOutOfRange {
                bundle: location.bundle,
                export: location.export,
            })?;
        let (packet_index, offset) = decoded
            .placement(location.export)
            .expect("placements cover every export");

        let packet = self.packet(&location.bundle, packet_index as u32).await?;
        let start = offset as usize;
        let end = start + entry.decoded_len as usize;
        let payload = packet[start..end].to_vec();

        let computed = BlobId::from_bytes(&payload);
        if computed != entry.hash {
            return Err(BundleError::HashMismatch {
                expected: entry.hash,
                computed,
            });
        }
        Ok(payload)
    }

    /// Resolve a reference found in `bundle` to the flushed location it
    /// points at.
    pub async fn resolve_ref(
        &self,
        bundle: &BlobId,
        reference: &ExportRef,
    ) -> BundleResult<FlushedLocation> {
        match reference {
            ExportRef::Local(export) => Ok(FlushedLocation {
                bundle: *bundle,
                export: *export,
            }),
            ExportRef::Imported { import, export } => {
                let decoded = self.bundle(bundle).await?;
                let target = decoded
                    .bundle()
                    .imports
                    .get(*import as usize)
                    .copied()
                    .ok_or(BundleError::ImportOutOfRange {
                        bundle: *bundle,
                        import: *import,
                    })?;
                Ok(FlushedLocation {
                    bundle: target,
                    export: *export,
                })
            }
        }
    }
}

impl std::fmt::Debug for BundleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleSource").finish_non_exhaustive()
    }
}
