use bale_bundle::format::{decode_varint, encode_varint};
use bale_bundle::ExportKind;
use bale_types::BlobId;
use bytes::Bytes;

use crate::error::{TreeError, TreeResult};

/// Tag byte opening an interior node payload.
const INTERIOR_TAG: u8 = b'I';

/// Current interior encoding: per-child cumulative end offsets.
const INTERIOR_VERSION: u8 = 2;

/// Legacy interior encoding: child ids only, no lengths. Decoded for
/// compatibility, never emitted.
const INTERIOR_VERSION_LEGACY: u8 = 1;

/// A reference from an interior node to one child.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChildRef {
    /// Content hash of the child's payload.
    pub id: BlobId,
    /// Cumulative stream length through this child: the subtree rooted at
    /// this node covers `[0, last child's end_offset)` of its slice of the
    /// stream. Zero for every child of a legacy-decoded node.
    pub end_offset: u64,
}

/// Terminal node: the raw bytes of one chunk.
///
/// A leaf's payload is the chunk itself, with no framing, so the leaf's
/// export hash is the content hash of the chunk bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafNode {
    pub data: Bytes,
}

impl LeafNode {
    /// Length of the chunk in bytes.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Returns `true` for the empty leaf.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Combining node: an ordered list of children with cumulative lengths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InteriorNode {
    /// The children, in stream order.
    pub children: Vec<ChildRef>,
    /// Set when this node was decoded from the legacy (no-lengths)
    /// encoding; its `end_offset`s are placeholders.
    legacy: bool,
}

impl InteriorNode {
    /// Build a node from children carrying real cumulative offsets.
    pub fn new(children: Vec<ChildRef>) -> Self {
        Self {
            children,
            legacy: false,
        }
    }

    /// Number of children.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Total stream bytes covered by this subtree. Unknown (zero) for
    /// legacy-decoded nodes.
    pub fn total_len(&self) -> u64 {
        self.children.last().map(|c| c.end_offset).unwrap_or(0)
    }

    /// Returns `true` if this node carries usable cumulative offsets.
    pub fn has_offsets(&self) -> bool {
        !self.legacy
    }

    /// Child containing stream offset `offset` (relative to this subtree),
    /// as `(child index, offset of that child's first byte)`.
    ///
    /// Binary search over the cumulative offsets; `None` for legacy nodes
    /// (callers fall back to a sequential scan) and for offsets at or past
    /// the end of the subtree.
    pub fn seek_child(&self, offset: u64) -> Option<(usize, u64)> {
        if self.legacy || offset >= self.total_len() {
            return None;
        }
        let index = self
            .children
            .partition_point(|c| c.end_offset <= offset);
        let start = if index == 0 {
            0
        } else {
            self.children[index - 1].end_offset
        };
        Some((index, start))
    }

    /// Encode in the current (explicit-offset) format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + self.children.len() * 40);
        buf.push(INTERIOR_TAG);
        buf.push(INTERIOR_VERSION);
        encode_varint(&mut buf, self.children.len() as u64);
        for child in &self.children {
            buf.extend_from_slice(child.id.as_bytes());
            encode_varint(&mut buf, child.end_offset);
        }
        buf
    }

    /// Decode either the current or the legacy encoding.
    pub fn decode(data: &[u8]) -> TreeResult<Self> {
        if data.len() < 2 || data[0] != INTERIOR_TAG {
            return Err(TreeError::CorruptNode {
                reason: "missing interior tag".into(),
            });
        }
        let version = data[1];
        let mut pos = 2;

        let (count, consumed) =
            decode_varint(&data[pos..]).map_err(|e| TreeError::CorruptNode {
                reason: e.to_string(),
            })?;
        pos += consumed;

        let mut children = Vec::with_capacity(count as usize);
        match version {
            INTERIOR_VERSION => {
                for _ in 0..count {
                    let id = take_hash(data, &mut pos)?;
                    let (end_offset, consumed) =
                        decode_varint(&data[pos..]).map_err(|e| TreeError::CorruptNode {
                            reason: e.to_string(),
                        })?;
                    pos += consumed;
                    children.push(ChildRef { id, end_offset });
                }
                Ok(Self {
                    children,
                    legacy: false,
                })
            }
            INTERIOR_VERSION_LEGACY => {
                for _ in 0..count {
                    let id = take_hash(data, &mut pos)?;
                    children.push(ChildRef { id, end_offset: 0 });
                }
                Ok(Self {
                    children,
                    legacy: true,
                })
            }
            other => Err(TreeError::UnsupportedNodeVersion(other as u16)),
        }
    }

    /// Encode in the legacy format. Test-only: the writer never emits it.
    #[cfg(test)]
    pub(crate) fn encode_legacy(children: &[BlobId]) -> Vec<u8> {
        let mut buf = vec![INTERIOR_TAG, INTERIOR_VERSION_LEGACY];
        encode_varint(&mut buf, children.len() as u64);
        for id in children {
            buf.extend_from_slice(id.as_bytes());
        }
        buf
    }
}

fn take_hash(data: &[u8], pos: &mut usize) -> TreeResult<BlobId> {
    if *pos + 32 > data.len() {
        return Err(TreeError::CorruptNode {
            reason: "truncated child id".into(),
        });
    }
    let hash: [u8; 32] = data[*pos..*pos + 32].try_into().unwrap();
    *pos += 32;
    Ok(BlobId::from_hash(hash))
}

/// A decoded tree node. Closed union: readers match exhaustively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeNode {
    Leaf(LeafNode),
    Interior(InteriorNode),
}

impl TreeNode {
    /// Decode an export payload according to its kind tag.
    ///
    /// Leaves are raw bytes; any other tree-bearing kind is an error here.
    pub fn decode(kind: ExportKind, data: &[u8]) -> TreeResult<Self> {
        match kind {
            ExportKind::Leaf => Ok(Self::Leaf(LeafNode {
                data: Bytes::copy_from_slice(data),
            })),
            ExportKind::Interior => Ok(Self::Interior(InteriorNode::decode(data)?)),
            other => Err(TreeError::CorruptNode {
                reason: format!("export kind {other} is not a tree node"),
            }),
        }
    }
}
