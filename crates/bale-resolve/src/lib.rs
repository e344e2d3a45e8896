//! Reference-graph resolution for the bale storage engine.
//!
//! A [`Document`] is a structured payload whose attachment fields reference
//! other stored data: plain blobs, further documents (objects), or logical
//! content ids. The [`Resolver`] walks a root document's attachment graph,
//! recursing through objects, resolving content ids through the content
//! index, and existence-checking every physical blob — with bounded
//! concurrent fan-out, since the cost is dominated by round-trip latency.
//!
//! Failures are collected, never raised at the first hit: the result either
//! verifies the complete reachable set or names *every* unresolved content
//! id and *every* missing blob, so upstream tooling can re-replicate
//! exactly the missing pieces.

pub mod document;
pub mod error;
pub mod resolver;

pub use document::{Attachment, Document};
pub use error::{PartialResolve, ResolveError, ResolveResult};
pub use resolver::{ResolvedSet, Resolver, ResolverConfig};
