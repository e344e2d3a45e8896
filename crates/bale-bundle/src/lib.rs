//! Bundle format and writer for the bale storage engine.
//!
//! A **bundle** is the unit of backend persistence: many logical blobs
//! (**exports**) batched into compressed **packets**, described by a header
//! (type table, import locators, export table, packet table) and written to
//! the backend as one immutable blob.
//!
//! # Architecture
//!
//! - **format**: the bit-exact wire encoding and its decoder
//! - **handle**: [`BlobHandle`] — pending (in the open bundle) or flushed
//!   (sealed into the backend), promoted exactly once through a shared
//!   indirection cell
//! - **writer**: [`BundleWriter`] — dedup by content hash, packet batching,
//!   compression, automatic sealing at size thresholds
//! - **reader**: [`BundleSource`] — fetch/decode bundles through the store
//!   with a constructor-injected bounded cache

pub mod error;
pub mod format;
pub mod handle;
pub mod reader;
pub mod writer;

pub use error::{BundleError, BundleResult};
pub use format::{
    Bundle, CompressionFormat, ExportEntry, ExportKind, ExportRef, PacketEntry, BUNDLE_MAGIC,
    BUNDLE_VERSION,
};
pub use handle::{BlobHandle, FlushedLocation, HandleState};
pub use reader::{BundleSource, DecodedBundle};
pub use writer::{BundleWriter, WriterConfig};
