//! The bundle wire format.
//!
//! Layout, in order (integers big-endian, lengths LEB128 varints):
//!
//! ```text
//! magic "BALE" | u32 version
//! type table:   count, per entry: u8 type id + u16 type version
//! import table: count, per entry: 32-byte bundle locator
//! export table: count, per entry: type index, 32-byte content hash,
//!               decoded length, ref count, refs (tag 0 = local export
//!               index; tag 1 = import index + export index)
//! packet table: count, per entry: u8 format id, encoded length,
//!               decoded length, u32 crc32 of the encoded bytes
//! packet bytes: concatenated encoded packets
//! trailer:      32-byte BLAKE3 of everything before it
//! ```
//!
//! Export payload placement is implicit: the depth-wise concatenation of
//! all *decoded* packets equals the concatenation of all export payloads in
//! export-table order, and no payload spans a packet boundary.

use bale_types::BlobId;

use crate::error::{BundleError, BundleResult};

/// Magic marker at the start of every bundle.
pub const BUNDLE_MAGIC: &[u8; 4] = b"BALE";

/// Current bundle format version.
pub const BUNDLE_VERSION: u32 = 2;

/// The kind of payload an export holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExportKind {
    /// Raw bytes of one chunk of a chunked stream.
    Leaf,
    /// An interior chunk-tree node (child ids + cumulative lengths).
    Interior,
    /// A structured payload with attachment fields.
    Document,
    /// Arbitrary un-chunked bytes.
    Raw,
}

impl ExportKind {
    /// Serialize to a type id byte.
    pub fn type_byte(&self) -> u8 {
        match self {
            Self::Leaf => 1,
            Self::Interior => 2,
            Self::Document => 3,
            Self::Raw => 4,
        }
    }

    /// Parse from a type id byte.
    pub fn from_type_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Leaf),
            2 => Some(Self::Interior),
            3 => Some(Self::Document),
            4 => Some(Self::Raw),
            _ => None,
        }
    }

    /// Current encoding version of this payload kind.
    ///
    /// Interior nodes are at version 2 (explicit per-child cumulative
    /// lengths); version 1 payloads remain decodable.
    pub fn payload_version(&self) -> u16 {
        match self {
            Self::Interior => 2,
            Self::Leaf | Self::Document | Self::Raw => 1,
        }
    }
}

impl std::fmt::Display for ExportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leaf => write!(f, "leaf"),
            Self::Interior => write!(f, "interior"),
            Self::Document => write!(f, "document"),
            Self::Raw => write!(f, "raw"),
        }
    }
}

/// A reference from one export to another.
///
/// The local/imported distinction is explicit so it is a compile-time fact,
/// never a sign convention on a raw integer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportRef {
    /// An export in the same bundle.
    Local(u32),
    /// An export in another bundle, via the import table.
    Imported { import: u32, export: u32 },
}

/// One entry in a bundle's export table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportEntry {
    /// Index into the bundle's type table.
    pub type_index: u32,
    /// Content hash of the decoded payload.
    pub hash: BlobId,
    /// Decoded payload length in bytes.
    pub decoded_len: u64,
    /// References to other exports, local or imported.
    pub refs: Vec<ExportRef>,
}

/// Compression applied to one packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionFormat {
    /// Stored as-is.
    None,
    /// Fast, lower-ratio compression (zstd level 1).
    Fast,
    /// Slower, high-ratio compression (zstd level 19).
    High,
}

impl CompressionFormat {
    /// Serialize to a format id byte.
    pub fn format_id(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Fast => 1,
            Self::High => 2,
        }
    }

    /// Parse from a format id byte.
    pub fn from_format_id(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::None),
            1 => Some(Self::Fast),
            2 => Some(Self::High),
            _ => None,
        }
    }

    /// Encode one decoded packet.
    pub fn encode(&self, decoded: &[u8]) -> BundleResult<Vec<u8>> {
        match self {
            Self::None => Ok(decoded.to_vec()),
            Self::Fast => zstd::encode_all(decoded, 1)
                .map_err(|e| BundleError::CompressionFailed(e.to_string())),
            Self::High => zstd::encode_all(decoded, 19)
                .map_err(|e| BundleError::CompressionFailed(e.to_string())),
        }
    }

    /// Decode one encoded packet, verifying the declared decoded length.
    pub fn decode(&self, encoded: &[u8], decoded_len: u64) -> BundleResult<Vec<u8>> {
        let decoded = match self {
            Self::None => encoded.to_vec(),
            Self::Fast | Self::High => zstd::decode_all(encoded)
                .map_err(|e| BundleError::DecompressionFailed(e.to_string()))?,
        };
        if decoded.len() as u64 != decoded_len {
            return Err(BundleError::CorruptBundle {
                reason: format!(
                    "packet decoded to {} bytes, expected {decoded_len}",
                    decoded.len()
                ),
            });
        }
        Ok(decoded)
    }
}

/// One entry in a bundle's packet table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketEntry {
    /// How the packet bytes are encoded.
    pub format: CompressionFormat,
    /// Length of the encoded bytes inside the bundle.
    pub encoded_len: u64,
    /// Length after decoding.
    pub decoded_len: u64,
    /// CRC32 of the encoded bytes, checked before decompression.
    pub crc32: u32,
}

/// A decoded bundle: header tables plus the raw (still encoded) packet
/// bytes. Immutable once written to the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bundle {
    /// Distinct payload types present, as (kind, payload version).
    pub types: Vec<(ExportKind, u16)>,
    /// Locators of bundles whose exports this bundle references.
    pub imports: Vec<BlobId>,
    /// The export table.
    pub exports: Vec<ExportEntry>,
    /// The packet table.
    pub packets: Vec<PacketEntry>,
    /// Concatenated encoded packets.
    pub packet_bytes: Vec<u8>,
}

impl Bundle {
    /// The export kind of entry `index`.
    pub fn export_kind(&self, index: u32) -> Option<ExportKind> {
        let entry = self.exports.get(index as usize)?;
        self.types.get(entry.type_index as usize).map(|(k, _)| *k)
    }

    /// Byte range of packet `index` within `packet_bytes`.
    pub fn packet_range(&self, index: usize) -> Option<(usize, usize)> {
        if index >= self.packets.len() {
            return None;
        }
        let start: u64 = self.packets[..index].iter().map(|p| p.encoded_len).sum();
        let end = start + self.packets[index].encoded_len;
        Some((start as usize, end as usize))
    }

    /// Placement of each export: `(packet index, offset in decoded packet)`.
    ///
    /// Derived from the invariant that decoded packets partition the
    /// concatenated export payloads without splitting any payload.
    pub fn export_placements(&self) -> BundleResult<Vec<(usize, u64)>> {
        let mut placements = Vec::with_capacity(self.exports.len());
        let mut packet = 0usize;
        let mut offset = 0u64;
        for (i, export) in self.exports.iter().enumerate() {
            // Skip packets exhausted by earlier exports.
            while packet < self.packets.len() && offset == self.packets[packet].decoded_len {
                packet += 1;
                offset = 0;
            }
            if packet >= self.packets.len() {
                return Err(BundleError::CorruptBundle {
                    reason: format!("export {i} has no backing packet"),
                });
            }
            if offset + export.decoded_len > self.packets[packet].decoded_len {
                return Err(BundleError::CorruptBundle {
                    reason: format!("export {i} spans a packet boundary"),
                });
            }
            placements.push((packet, offset));
            offset += export.decoded_len;
        }
        Ok(placements)
    }

    /// Serialize the bundle to its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.packet_bytes.len() + 256);
        buf.extend_from_slice(BUNDLE_MAGIC);
        buf.extend_from_slice(&BUNDLE_VERSION.to_be_bytes());

        encode_varint(&mut buf, self.types.len() as u64);
        for (kind, version) in &self.types {
            buf.push(kind.type_byte());
            buf.extend_from_slice(&version.to_be_bytes());
        }

        encode_varint(&mut buf, self.imports.len() as u64);
        for locator in &self.imports {
            buf.extend_from_slice(locator.as_bytes());
        }

        encode_varint(&mut buf, self.exports.len() as u64);
        for export in &self.exports {
            encode_varint(&mut buf, export.type_index as u64);
            buf.extend_from_slice(export.hash.as_bytes());
            encode_varint(&mut buf, export.decoded_len);
            encode_varint(&mut buf, export.refs.len() as u64);
            for r in &export.refs {
                match r {
                    ExportRef::Local(index) => {
                        buf.push(0);
                        encode_varint(&mut buf, *index as u64);
                    }
                    ExportRef::Imported { import, export } => {
                        buf.push(1);
                        encode_varint(&mut buf, *import as u64);
                        encode_varint(&mut buf, *export as u64);
                    }
                }
            }
        }

        encode_varint(&mut buf, self.packets.len() as u64);
        for packet in &self.packets {
            buf.push(packet.format.format_id());
            encode_varint(&mut buf, packet.encoded_len);
            encode_varint(&mut buf, packet.decoded_len);
            buf.extend_from_slice(&packet.crc32.to_be_bytes());
        }

        buf.extend_from_slice(&self.packet_bytes);

        let checksum = *blake3::hash(&buf).as_bytes();
        buf.extend_from_slice(&checksum);
        buf
    }

    /// Decode a bundle from its wire representation, validating magic,
    /// version, trailer checksum, and table bounds.
    pub fn decode(data: &[u8]) -> BundleResult<Self> {
        if data.len() < 8 + 32 {
            return Err(BundleError::CorruptBundle {
                reason: "bundle data too short".into(),
            });
        }
        if &data[0..4] != BUNDLE_MAGIC {
            return Err(BundleError::InvalidMagic {
                expected: String::from_utf8_lossy(BUNDLE_MAGIC).into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let version = u32::from_be_bytes(data[4..8].try_into().unwrap());
        if version != BUNDLE_VERSION {
            return Err(BundleError::UnsupportedVersion(version));
        }

        let body_end = data.len() - 32;
        let declared: [u8; 32] = data[body_end..].try_into().unwrap();
        let computed = *blake3::hash(&data[..body_end]).as_bytes();
        if declared != computed {
            return Err(BundleError::ChecksumMismatch);
        }

        let mut cursor = Cursor::new(&data[..body_end], 8);

        let type_count = cursor.varint()?;
        let mut types = Vec::with_capacity(type_count as usize);
        for _ in 0..type_count {
            let byte = cursor.u8()?;
            let kind = ExportKind::from_type_byte(byte).ok_or_else(|| {
                BundleError::CorruptBundle {
                    reason: format!("unknown type byte: {byte}"),
                }
            })?;
            let version = cursor.u16()?;
            types.push((kind, version));
        }

        let import_count = cursor.varint()?;
        let mut imports = Vec::with_capacity(import_count as usize);
        for _ in 0..import_count {
            imports.push(BlobId::from_hash(cursor.hash()?));
        }

        let export_count = cursor.varint()?;
        let mut exports = Vec::with_capacity(export_count as usize);
        for _ in 0..export_count {
            let type_index = cursor.varint()? as u32;
            if type_index as u64 >= type_count {
                return Err(BundleError::CorruptBundle {
                    reason: format!("type index {type_index} out of range"),
                });
            }
            let hash = BlobId::from_hash(cursor.hash()?);
            let decoded_len = cursor.varint()?;
            let ref_count = cursor.varint()?;
            let mut refs = Vec::with_capacity(ref_count as usize);
            for _ in 0..ref_count {
                let tag = cursor.u8()?;
                refs.push(match tag {
                    0 => ExportRef::Local(cursor.varint()? as u32),
                    1 => ExportRef::Imported {
                        import: cursor.varint()? as u32,
                        export: cursor.varint()? as u32,
                    },
                    other => {
                        return Err(BundleError::CorruptBundle {
                            reason: format!("unknown ref tag: {other}"),
                        })
                    }
                });
            }
            exports.push(ExportEntry {
                type_index,
                hash,
                decoded_len,
                refs,
            });
        }

        let packet_count = cursor.varint()?;
        let mut packets = Vec::with_capacity(packet_count as usize);
        for _ in 0..packet_count {
            let byte = cursor.u8()?;
            let format = CompressionFormat::from_format_id(byte).ok_or_else(|| {
                BundleError::CorruptBundle {
                    reason: format!("unknown compression format id: {byte}"),
                }
            })?;
            let encoded_len = cursor.varint()?;
            let decoded_len = cursor.varint()?;
            let crc32 = cursor.u32()?;
            packets.push(PacketEntry {
                format,
                encoded_len,
                decoded_len,
                crc32,
            });
        }

        let packet_bytes = cursor.rest().to_vec();
        let expected: u64 = packets.iter().map(|p| p.encoded_len).sum();
        if packet_bytes.len() as u64 != expected {
            return Err(BundleError::CorruptBundle {
                reason: format!(
                    "packet bytes length {} does not match table total {expected}",
                    packet_bytes.len()
                ),
            });
        }

        let bundle = Self {
            types,
            imports,
            exports,
            packets,
            packet_bytes,
        };
        // Validate ref and placement consistency up front so readers can
        // index without re-checking.
        for (i, export) in bundle.exports.iter().enumerate() {
            for r in &export.refs {
                match r {
                    ExportRef::Local(index) => {
                        if *index as usize >= bundle.exports.len() {
                            return Err(BundleError::CorruptBundle {
                                reason: format!("export {i}: local ref {index} out of range"),
                            });
                        }
                    }
                    ExportRef::Imported { import, .. } => {
                        if *import as usize >= bundle.imports.len() {
                            return Err(BundleError::CorruptBundle {
                                reason: format!("export {i}: import {import} out of range"),
                            });
                        }
                    }
                }
            }
        }
        bundle.export_placements()?;
        Ok(bundle)
    }
}

/// Encode a u64 as a variable-length integer (LEB128).
pub fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a variable-length integer. Returns `(value, bytes consumed)`.
pub fn decode_varint(data: &[u8]) -> BundleResult<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.iter().enumerate() {
        value |= ((byte & 0x7F) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        if shift >= 64 {
            return Err(BundleError::CorruptBundle {
                reason: "varint overflow".into(),
            });
        }
    }
    Err(BundleError::CorruptBundle {
        reason: "truncated varint".into(),
    })
}

/// Bounds-checked reader over the header bytes.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn take(&mut self, n: usize) -> BundleResult<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(BundleError::CorruptBundle {
                reason: "truncated header".into(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> BundleResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> BundleResult<u16> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> BundleResult<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn hash(&mut self) -> BundleResult<[u8; 32]> {
        Ok(self.take(32)?.try_into().unwrap())
    }

    fn varint(&mut self) -> BundleResult<u64> {
        let (value, consumed) = decode_varint(&self.data[self.pos..])?;
        self.pos += consumed;
        Ok(value)
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bundle() -> Bundle {
        let payload_a = b"first payload".to_vec();
        let payload_b = b"second payload, a bit longer".to_vec();

        let mut decoded = payload_a.clone();
        decoded.extend_from_slice(&payload_b);
        let format = CompressionFormat::Fast;
        let encoded = format.encode(&decoded).unwrap();
        let crc = crc32fast::hash(&encoded);

        Bundle {
            types: vec![(ExportKind::Raw, 1), (ExportKind::Document, 1)],
            imports: vec![BlobId::from_bytes(b"some other bundle")],
            exports: vec![
                ExportEntry {
                    type_index: 0,
                    hash: BlobId::from_bytes(&payload_a),
                    decoded_len: payload_a.len() as u64,
                    refs: vec![],
                },
                ExportEntry {
                    type_index: 1,
                    hash: BlobId::from_bytes(&payload_b),
                    decoded_len: payload_b.len() as u64,
                    refs: vec![
                        ExportRef::Local(0),
                        ExportRef::Imported {
                            import: 0,
                            export: 7,
                        },
                    ],
                },
            ],
            packets: vec![PacketEntry {
                format,
                encoded_len: encoded.len() as u64,
                decoded_len: decoded.len() as u64,
                crc32: crc,
            }],
            packet_bytes: encoded,
        }
    }

    #[test]
    fn varint_roundtrip() {
        for value in [0u64, 1, 42, 127, 128, 1_000_000, u64::MAX] {
            let mut buf = Vec::new();
            encode_varint(&mut buf, value);
            let (decoded, consumed) = decode_varint(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, buf.len());
        }
    }

    #[test]
    fn varint_truncated() {
        let err = decode_varint(&[0x80]).unwrap_err();
        assert!(matches!(err, BundleError::CorruptBundle { .. }));
    }

    #[test]
    fn encode_decode_roundtrip() {
        let bundle = sample_bundle();
        let bytes = bundle.encode();
        let decoded = Bundle::decode(&bytes).unwrap();
        assert_eq!(decoded, bundle);
    }

    #[test]
    fn empty_bundle_roundtrip() {
        let bundle = Bundle {
            types: vec![],
            imports: vec![],
            exports: vec![],
            packets: vec![],
            packet_bytes: vec![],
        };
        let decoded = Bundle::decode(&bundle.encode()).unwrap();
        assert_eq!(decoded, bundle);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = sample_bundle().encode();
        bytes[0..4].copy_from_slice(b"NOPE");
        let err = Bundle::decode(&bytes).unwrap_err();
        assert!(matches!(err, BundleError::InvalidMagic { .. }));
    }

    #[test]
    fn bad_version_is_rejected() {
        let mut bytes = sample_bundle().encode();
        bytes[4..8].copy_from_slice(&99u32.to_be_bytes());
        let err = Bundle::decode(&bytes).unwrap_err();
        assert!(matches!(err, BundleError::UnsupportedVersion(99)));
    }

    #[test]
    fn flipped_body_byte_fails_checksum() {
        let mut bytes = sample_bundle().encode();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        let err = Bundle::decode(&bytes).unwrap_err();
        assert!(matches!(err, BundleError::ChecksumMismatch));
    }

    #[test]
    fn truncated_data_is_rejected() {
        let bytes = sample_bundle().encode();
        let err = Bundle::decode(&bytes[..10]).unwrap_err();
        assert!(matches!(err, BundleError::CorruptBundle { .. }));
    }

    #[test]
    fn placements_follow_export_order() {
        let bundle = sample_bundle();
        let placements = bundle.export_placements().unwrap();
        assert_eq!(placements, vec![(0, 0), (0, 13)]);
    }

    #[test]
    fn placement_rejects_spanning_export() {
        let mut bundle = sample_bundle();
        // Shrink the packet's decoded length so the second export no
        // longer fits.
        bundle.packets[0].decoded_len -= 1;
        let err = bundle.export_placements().unwrap_err();
        assert!(matches!(err, BundleError::CorruptBundle { .. }));
    }

    #[test]
    fn compression_formats_roundtrip() {
        let data = b"abcabcabcabcabcabc-compressible-abcabcabc".repeat(50);
        for format in [
            CompressionFormat::None,
            CompressionFormat::Fast,
            CompressionFormat::High,
        ] {
            let encoded = format.encode(&data).unwrap();
            let decoded = format.decode(&encoded, data.len() as u64).unwrap();
            assert_eq!(decoded, data);
        }
    }

    #[test]
    fn decode_rejects_wrong_decoded_len() {
        let data = b"payload bytes".to_vec();
        let encoded = CompressionFormat::Fast.encode(&data).unwrap();
        let err = CompressionFormat::Fast
            .decode(&encoded, data.len() as u64 + 1)
            .unwrap_err();
        assert!(matches!(err, BundleError::CorruptBundle { .. }));
    }

    #[test]
    fn type_byte_roundtrip() {
        for kind in [
            ExportKind::Leaf,
            ExportKind::Interior,
            ExportKind::Document,
            ExportKind::Raw,
        ] {
            assert_eq!(ExportKind::from_type_byte(kind.type_byte()), Some(kind));
        }
        assert!(ExportKind::from_type_byte(0).is_none());
        assert!(ExportKind::from_type_byte(200).is_none());
    }

    #[test]
    fn local_ref_out_of_range_is_rejected() {
        let mut bundle = sample_bundle();
        bundle.exports[1].refs[0] = ExportRef::Local(99);
        let err = Bundle::decode(&bundle.encode()).unwrap_err();
        assert!(matches!(err, BundleError::CorruptBundle { .. }));
    }
}
