//! Content-defined chunking for the bale storage engine.
//!
//! Splits a byte stream into variable-length chunks whose boundaries are
//! chosen by a rolling hash over a trailing window of content. Because a
//! boundary depends only on the bytes near it — never on absolute stream
//! position — identical byte runs produce identical chunks wherever they
//! occur, which is the basis for deduplication.
//!
//! The chunker is pure and synchronous: it performs no I/O and cannot fail
//! except on invalid configuration.

pub mod chunker;
pub mod config;
pub mod error;
pub mod rolling;

pub use chunker::{Chunk, ChunkIter, Chunker};
pub use config::ChunkerConfig;
pub use error::{ChunkError, ChunkResult};
pub use rolling::RollingHash;
