use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use tracing::{debug, info, trace};

use bale_store::BlobStore;
use bale_types::BlobId;

use crate::error::{BundleError, BundleResult};
use crate::format::{Bundle, CompressionFormat, ExportEntry, ExportKind, ExportRef, PacketEntry};
use crate::handle::{BlobHandle, FlushedLocation, HandleCell, HandleState};
use crate::reader::BundleSource;

/// Default packet size threshold (64 KiB).
pub const DEFAULT_PACKET_TARGET: usize = 64 * 1024;

/// Default maximum bundle size (8 MiB).
pub const DEFAULT_MAX_BUNDLE: usize = 8 * 1024 * 1024;

/// Bundle writer parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriterConfig {
    /// The open packet is compressed and appended to the bundle once it
    /// reaches this many bytes. Batching small payloads into one packet
    /// amortizes compression and framing overhead.
    pub packet_target_size: usize,
    /// The bundle is sealed to the backend once its payload bytes reach
    /// this threshold. A single payload larger than this can never fit
    /// and is rejected.
    pub max_bundle_size: usize,
    /// Compression applied to flushed packets.
    pub compression: CompressionFormat,
}

impl WriterConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> BundleResult<()> {
        if self.packet_target_size == 0 {
            return Err(BundleError::InvalidConfig(
                "packet_target_size must be non-zero".into(),
            ));
        }
        if self.max_bundle_size == 0 {
            return Err(BundleError::InvalidConfig(
                "max_bundle_size must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            packet_target_size: DEFAULT_PACKET_TARGET,
            max_bundle_size: DEFAULT_MAX_BUNDLE,
            compression: CompressionFormat::Fast,
        }
    }
}

/// Accepts blob write requests and batches them into sealed bundles.
///
/// A session is single-producer: exactly one logical writer appends and
/// flushes at a time. Sealed bundles are immutable and safe for unlimited
/// concurrent readers; independent producers use independent sessions,
/// which is safe because backend writes are content-keyed and idempotent.
///
/// Handles returned by [`write_blob`] start `Pending` and are promoted to
/// `Flushed` exactly once when their bundle seals; reads through
/// [`read_blob`] work at every stage of that lifecycle.
///
/// [`write_blob`]: BundleWriter::write_blob
/// [`read_blob`]: BundleWriter::read_blob
pub struct BundleWriter {
    config: WriterConfig,
    source: BundleSource,

    /// Session-wide dedup: content hash -> handle already issued.
    dedup: HashMap<BlobId, BlobHandle>,
    /// Sequence number of the open bundle within this session.
    bundle_seq: u64,
    /// Locators of bundles sealed by this session, in seal order.
    sealed: Vec<BlobId>,

    // --- open bundle state ---
    types: Vec<(ExportKind, u16)>,
    type_index: HashMap<ExportKind, u32>,
    imports: Vec<BlobId>,
    import_index: HashMap<BlobId, u32>,
    exports: Vec<ExportEntry>,
    /// Per export: (packet index, offset in decoded packet). A packet index
    /// equal to `packets.len()` means the open packet.
    placements: Vec<(usize, u64)>,
    /// Indirection cells of the open bundle's exports, by export index.
    open_cells: Vec<Arc<HandleCell>>,
    packets: Vec<PacketEntry>,
    /// Encoded bytes of flushed packets.
    packet_bytes: Vec<u8>,
    /// Raw bytes of the open (not yet compressed) packet.
    open_packet: Vec<u8>,
}

impl BundleWriter {
    /// Create a writer session over `store`.
    pub fn new(store: Arc<dyn BlobStore>, config: WriterConfig) -> BundleResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            source: BundleSource::new(store, 16),
            dedup: HashMap::new(),
            bundle_seq: 0,
            sealed: Vec::new(),
            types: Vec::new(),
            type_index: HashMap::new(),
            imports: Vec::new(),
            import_index: HashMap::new(),
            exports: Vec::new(),
            placements: Vec::new(),
            open_cells: Vec::new(),
            packets: Vec::new(),
            packet_bytes: Vec::new(),
            open_packet: Vec::new(),
        })
    }

    /// The configuration this session was built with.
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Locators of bundles sealed by this session so far.
    pub fn sealed_bundles(&self) -> &[BlobId] {
        &self.sealed
    }

    /// Number of exports accumulated in the open bundle.
    pub fn open_exports(&self) -> usize {
        self.exports.len()
    }

    /// Write a payload, returning its handle.
    ///
    /// If an export with the same content hash was already written in this
    /// session, its existing handle is returned and nothing is stored
    /// again. Otherwise the payload joins the open packet; the packet is
    /// compressed into the bundle when it reaches the packet threshold, and
    /// the bundle is sealed to the backend when it reaches the bundle
    /// threshold (which may suspend on backend I/O).
    pub async fn write_blob(
        &mut self,
        kind: ExportKind,
        payload: &[u8],
        refs: &[BlobHandle],
    ) -> BundleResult<BlobHandle> {
        if payload.len() > self.config.max_bundle_size {
            return Err(BundleError::PayloadTooLarge {
                size: payload.len() as u64,
                max: self.config.max_bundle_size as u64,
            });
        }

        let hash = BlobId::from_bytes(payload);
        if let Some(existing) = self.dedup.get(&hash) {
            trace!(hash = %hash.short_hex(), "dedup hit");
            return Ok(existing.clone());
        }

        let refs = self.resolve_refs(refs)?;

        // Keep whole payloads inside one packet: flush the open packet
        // first if this payload would push it past the threshold.
        if !self.open_packet.is_empty()
            && self.open_packet.len() + payload.len() > self.config.packet_target_size
        {
            self.flush_packet()?;
        }

        let export_index = self.exports.len() as u32;
        let type_index = self.intern_type(kind);
        self.placements
            .push((self.packets.len(), self.open_packet.len() as u64));
        self.open_packet.extend_from_slice(payload);
        self.exports.push(ExportEntry {
            type_index,
            hash,
            decoded_len: payload.len() as u64,
            refs,
        });

        let cell = HandleCell::pending(self.bundle_seq, export_index);
        self.open_cells.push(cell.clone());
        let handle = BlobHandle::new(hash, cell);
        self.dedup.insert(hash, handle.clone());

        if self.open_packet.len() >= self.config.packet_target_size {
            self.flush_packet()?;
        }
        if self.bundle_payload_bytes() >= self.config.max_bundle_size {
            self.seal().await?;
        }

        Ok(handle)
    }

    /// Read a payload through its handle, at any lifecycle stage.
    ///
    /// Dereferences the handle's current indirection state: open-packet
    /// bytes, a flushed packet of the open bundle, or a sealed bundle
    /// fetched through the store.
    pub async fn read_blob(&self, handle: &BlobHandle) -> BundleResult<Vec<u8>> {
        match handle.state() {
            HandleState::Flushed(location) => self.source.read_export(&location).await,
            HandleState::Pending { bundle_seq, export } => {
                if bundle_seq != self.bundle_seq {
                    return Err(BundleError::UnresolvableRef {
                        hash: handle.hash(),
                    });
                }
                let entry = self.exports.get(export as usize).ok_or_else(|| {
                    BundleError::UnresolvableRef {
                        hash: handle.hash(),
                    }
                })?;
                let (packet_index, offset) = self.placements[export as usize];
                let start = offset as usize;
                let end = start + entry.decoded_len as usize;

                let payload = if packet_index == self.packets.len() {
                    self.open_packet[start..end].to_vec()
                } else {
                    let decoded = self.decode_own_packet(packet_index)?;
                    decoded[start..end].to_vec()
                };

                let computed = BlobId::from_bytes(&payload);
                if computed != entry.hash {
                    return Err(BundleError::HashMismatch {
                        expected: entry.hash,
                        computed,
                    });
                }
                Ok(payload)
            }
        }
    }

    /// Flush the open packet and seal the open bundle, if non-empty.
    ///
    /// Returns the locator of the sealed bundle, or `None` if there was
    /// nothing to seal.
    pub async fn flush(&mut self) -> BundleResult<Option<BlobId>> {
        self.seal().await
    }

    /// Read access to sealed bundles written by this (or any) session.
    pub fn source(&self) -> &BundleSource {
        &self.source
    }

    /// Payload bytes accumulated in the open bundle (encoded flushed
    /// packets plus the raw open packet).
    fn bundle_payload_bytes(&self) -> usize {
        self.packet_bytes.len() + self.open_packet.len()
    }

    fn intern_type(&mut self, kind: ExportKind) -> u32 {
        if let Some(&index) = self.type_index.get(&kind) {
            return index;
        }
        let index = self.types.len() as u32;
        self.types.push((kind, kind.payload_version()));
        self.type_index.insert(kind, index);
        index
    }

    fn intern_import(&mut self, bundle: BlobId) -> u32 {
        if let Some(&index) = self.import_index.get(&bundle) {
            return index;
        }
        let index = self.imports.len() as u32;
        self.imports.push(bundle);
        self.import_index.insert(bundle, index);
        index
    }

    /// Encode handle references against the open bundle: local for exports
    /// still pending in it, imported for anything already sealed.
    fn resolve_refs(&mut self, refs: &[BlobHandle]) -> BundleResult<Vec<ExportRef>> {
        let mut resolved = Vec::with_capacity(refs.len());
        for handle in refs {
            match handle.state() {
                HandleState::Flushed(location) => resolved.push(ExportRef::Imported {
                    import: self.intern_import(location.bundle),
                    export: location.export,
                }),
                HandleState::Pending { bundle_seq, export } => {
                    if bundle_seq != self.bundle_seq {
                        return Err(BundleError::UnresolvableRef {
                            hash: handle.hash(),
                        });
                    }
                    resolved.push(ExportRef::Local(export));
                }
            }
        }
        Ok(resolved)
    }

    /// Compress the open packet and append it to the open bundle.
    fn flush_packet(&mut self) -> BundleResult<()> {
        if self.open_packet.is_empty() {
            return Ok(());
        }
        let decoded_len = self.open_packet.len() as u64;
        let encoded = self.config.compression.encode(&self.open_packet)?;
        let crc32 = crc32fast::hash(&encoded);
        debug!(
            packet = self.packets.len(),
            decoded_len,
            encoded_len = encoded.len(),
            "packet flushed"
        );
        self.packets.push(PacketEntry {
            format: self.config.compression,
            encoded_len: encoded.len() as u64,
            decoded_len,
            crc32,
        });
        self.packet_bytes.extend_from_slice(&encoded);
        self.open_packet.clear();
        Ok(())
    }

    /// Decode one of the open bundle's already-flushed packets.
    fn decode_own_packet(&self, index: usize) -> BundleResult<Vec<u8>> {
        let entry = self.packets[index];
        let start: u64 = self.packets[..index].iter().map(|p| p.encoded_len).sum();
        let encoded = &self.packet_bytes[start as usize..(start + entry.encoded_len) as usize];
        entry.format.decode(encoded, entry.decoded_len)
    }

    /// Seal the open bundle: write header + packets as one backend blob and
    /// promote every pending handle to its flushed location.
    ///
    /// A backend failure leaves the bundle fully pending and retryable; no
    /// partial or corrupt bundle ever becomes visible to readers.
    async fn seal(&mut self) -> BundleResult<Option<BlobId>> {
        self.flush_packet()?;
        if self.exports.is_empty() {
            return Ok(None);
        }

        let bundle = Bundle {
            types: mem::take(&mut self.types),
            imports: mem::take(&mut self.imports),
            exports: mem::take(&mut self.exports),
            packets: mem::take(&mut self.packets),
            packet_bytes: mem::take(&mut self.packet_bytes),
        };
        let bytes = bundle.encode();

        let locator = match self.source.store().write_blob(&bytes).await {
            Ok(locator) => locator,
            Err(err) => {
                // Restore the open bundle untouched; the caller may retry.
                self.types = bundle.types;
                self.imports = bundle.imports;
                self.exports = bundle.exports;
                self.packets = bundle.packets;
                self.packet_bytes = bundle.packet_bytes;
                return Err(err.into());
            }
        };

        for (export, cell) in self.open_cells.drain(..).enumerate() {
            cell.promote(FlushedLocation {
                bundle: locator,
                export: export as u32,
            });
        }
        info!(
            bundle = %locator.short_hex(),
            exports = bundle.exports.len(),
            bytes = bytes.len(),
            "bundle sealed"
        );

        self.type_index.clear();
        self.import_index.clear();
        self.placements.clear();
        self.bundle_seq += 1;
        self.sealed.push(locator);
        Ok(Some(locator))
    }
}

impl std::fmt::Debug for BundleWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleWriter")
            .field("bundle_seq", &self.bundle_seq)
            .field("open_exports", &self.exports.len())
            .field("sealed", &self.sealed.len())
            .finish()
    }
}
