use bale_types::BlobId;
use bytes::Bytes;

use crate::config::ChunkerConfig;
use crate::error::ChunkResult;
use crate::rolling::RollingHash;

/// A content-defined chunk of the original stream.
///
/// Covers the byte range `[offset, offset + data.len())`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// Offset of this chunk in the original stream.
    pub offset: u64,
    /// The chunk's bytes.
    pub data: Bytes,
}

impl Chunk {
    /// Length of the chunk in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the chunk is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Content-addressed identifier of the chunk's bytes.
    pub fn blob_id(&self) -> BlobId {
        BlobId::from_bytes(&self.data)
    }
}

/// Content-defined chunker.
///
/// Construction validates the configuration; splitting never fails after
/// that. The same configuration over the same bytes always produces the
/// same boundaries.
#[derive(Clone, Debug)]
pub struct Chunker {
    config: ChunkerConfig,
    mask: u64,
}

impl Chunker {
    /// Create a chunker, validating the configuration.
    pub fn new(config: ChunkerConfig) -> ChunkResult<Self> {
        config.validate()?;
        let mask = config.boundary_mask();
        Ok(Self { config, mask })
    }

    /// The configuration this chunker was built with.
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Lazily split `data` into chunks.
    ///
    /// The returned iterator borrows `data`; it can be dropped and a new one
    /// started at any time (restartable), and yields nothing for empty
    /// input.
    pub fn split<'a>(&self, data: &'a [u8]) -> ChunkIter<'a> {
        ChunkIter {
            data,
            pos: 0,
            min: self.config.min_chunk as usize,
            max: self.config.max_chunk as usize,
            mask: self.mask,
            hash: RollingHash::new(self.config.window_size),
        }
    }

    /// Split `data` eagerly into a vector of chunks.
    pub fn split_all(&self, data: &[u8]) -> Vec<Chunk> {
        self.split(data).collect()
    }
}

/// Lazy iterator over the chunks of one byte slice.
pub struct ChunkIter<'a> {
    data: &'a [u8],
    pos: usize,
    min: usize,
    max: usize,
    mask: u64,
    hash: RollingHash,
}

impl ChunkIter<'_> {
    /// Find the length of the next chunk starting at `self.pos`.
    fn next_cut(&mut self) -> usize {
        let remaining = &self.data[self.pos..];
        if remaining.len() <= self.min {
            // Final (possibly short) chunk.
            return remaining.len();
        }

        self.hash.reset();
        let limit = remaining.len().min(self.max);
        for (i, &byte) in remaining[..limit].iter().enumerate() {
            let digest = self.hash.roll(byte);
            // Boundary testing starts only after min_chunk bytes.
            if i + 1 >= self.min && digest & self.mask == self.mask {
                return i + 1;
            }
        }
        // No content boundary found: force a cut at max_chunk, or take the
        // tail if the stream ends first.
        limit
    }
}

impl Iterator for ChunkIter<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.pos >= self.data.len() {
            return None;
        }
        let len = self.next_cut();
        let offset = self.pos as u64;
        let chunk = Chunk {
            offset,
            data: Bytes::copy_from_slice(&self.data[self.pos..self.pos + len]),
        };
        self.pos += len;
        Some(chunk)
    }
}
