//! Foundation types for the bale storage engine.
//!
//! Everything stored by bale is addressed by the BLAKE3 hash of its bytes.
//! Two identifier types share that 32-byte hash namespace:
//!
//! - [`BlobId`] names a physical backend blob (an opaque immutable payload).
//! - [`ContentId`] names a *logical* content identity that may be
//!   materialized by one or more physical blobs. An object that was never
//!   chunked is its own blob, so a `ContentId` can be reinterpreted as a
//!   `BlobId` directly via [`ContentId::as_blob_id`].

pub mod error;
pub mod id;

pub use error::TypeError;
pub use id::{BlobId, ContentId};
