//! Chunk trees for the bale storage engine.
//!
//! A chunked stream is stored as a Merkle-style DAG: each chunk becomes a
//! **leaf** export, and groups of up to `max_children` nodes are combined
//! into **interior** exports carrying each child's id and cumulative byte
//! length. Depth-first concatenation of all leaves reproduces the original
//! stream exactly; the cumulative lengths give O(log n) random access by
//! offset.
//!
//! - [`TreeBuilder`] constructs trees bottom-up while streaming, holding
//!   only handles in flight.
//! - [`TreeStream`] / [`TreeReader`] walk a sealed tree lazily, in order,
//!   or from an arbitrary offset.

pub mod builder;
pub mod error;
pub mod node;
pub mod reader;

pub use builder::{TreeBuilder, TreeConfig};
pub use error::{TreeError, TreeResult};
pub use node::{ChildRef, InteriorNode, LeafNode, TreeNode};
pub use reader::{TreeReader, TreeStream};
