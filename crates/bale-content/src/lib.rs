//! Content-id indirection for the bale storage engine.
//!
//! A [`ContentId`] names *logical* content; the blobs that materialize it
//! are physical. [`ContentIndex`] maps one to the other through the store's
//! weighted alias surface: `put` registers (or strengthens) a mapping, and
//! `resolve` looks it up, falling back to treating the content id's own
//! hash as a direct blob id when no mapping exists — an object that was
//! never chunked is its own blob.
//!
//! Mappings are created and strengthened here but never physically deleted
//! by this layer; dropping a namespace is an external operation over the
//! store's alias enumeration.
//!
//! [`ContentId`]: bale_types::ContentId

pub mod error;
pub mod index;

pub use error::{ContentError, ContentResult};
pub use index::ContentIndex;
