use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use bale_types::BlobId;

/// A weighted alias pointing a name at a physical blob.
///
/// Multiple records may exist under one name (several physical
/// representations of the same logical content). Lookups pick the preferred
/// record by weight; see [`AliasRecord::preferred`] for the exact policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRecord {
    /// The blob this alias points at.
    pub target: BlobId,
    /// Preference weight. Higher wins.
    pub weight: u32,
    /// Opaque payload attached by the layer that created the alias.
    pub data: Option<Vec<u8>>,
}

impl AliasRecord {
    /// Create a record without an attached payload.
    pub fn new(target: BlobId, weight: u32) -> Self {
        Self {
            target,
            weight,
            data: None,
        }
    }

    /// Ordering used to pick one record among several for the same name:
    /// highest weight wins, equal weights break toward the
    /// lexicographically smallest target id. Deterministic by construction.
    pub fn preferred(&self, other: &Self) -> Ordering {
        self.weight
            .cmp(&other.weight)
            .then_with(|| other.target.as_bytes().cmp(self.target.as_bytes()))
    }
}

/// The target a named ref pins: a root export inside a sealed bundle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefTarget {
    /// Locator of the sealed bundle holding the root export.
    pub bundle: BlobId,
    /// Export index of the root within that bundle.
    pub export: u32,
}

impl RefTarget {
    /// Create a ref target.
    pub fn new(bundle: BlobId, export: u32) -> Self {
        Self { bundle, export }
    }
}
