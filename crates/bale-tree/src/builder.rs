use tracing::debug;

use bale_bundle::{BlobHandle, BundleResult, BundleWriter, ExportKind};

use crate::error::{TreeError, TreeResult};
use crate::node::{ChildRef, InteriorNode};

/// Default maximum children per interior node.
pub const DEFAULT_MAX_CHILDREN: usize = 128;

/// Tree shape parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeConfig {
    /// An interior node is emitted as soon as this many children
    /// accumulate at one level.
    pub max_children: usize,
    /// Lower bound on children for non-last interior nodes. The builder
    /// always fills nodes to `max_children` while streaming, so this only
    /// documents the invariant readers may rely on.
    pub min_children: usize,
}

impl TreeConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> TreeResult<()> {
        if self.min_children < 2 || self.min_children > self.max_children {
            return Err(TreeError::InvalidConfig(format!(
                "child bounds: 2 <= min {} <= max {} violated",
                self.min_children, self.max_children
            )));
        }
        Ok(())
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_children: DEFAULT_MAX_CHILDREN,
            min_children: 2,
        }
    }
}

/// One pending subtree at some level: its root handle and the stream bytes
/// it covers.
#[derive(Clone, Debug)]
struct LevelEntry {
    handle: BlobHandle,
    len: u64,
}

/// Builds a chunk tree bottom-up through a [`BundleWriter`].
///
/// Chunks are pushed in stream order; whenever a level accumulates
/// `max_children` entries they collapse into an interior export, cascading
/// upward. The builder holds only handles and lengths in flight — payload
/// bytes live in the writer's packet buffers — so memory stays bounded
/// regardless of total stream size.
pub struct TreeBuilder<'w> {
    writer: &'w mut BundleWriter,
    config: TreeConfig,
    /// `levels[0]` holds leaves, `levels[i + 1]` holds interiors over
    /// `levels[i]`.
    levels: Vec<Vec<LevelEntry>>,
}

impl<'w> TreeBuilder<'w> {
    /// Start a tree in the given writer session.
    pub fn new(writer: &'w mut BundleWriter, config: TreeConfig) -> TreeResult<Self> {
        config.validate()?;
        Ok(Self {
            writer,
            config,
            levels: Vec::new(),
        })
    }

    /// Append one chunk of the stream as a leaf.
    pub async fn push_chunk(&mut self, data: &[u8]) -> TreeResult<BlobHandle> {
        let handle = self.writer.write_blob(ExportKind::Leaf, data, &[]).await?;
        self.push_entry(
            0,
            LevelEntry {
                handle: handle.clone(),
                len: data.len() as u64,
            },
        )
        .await?;
        Ok(handle)
    }

    /// Append an already-built subtree covering `len` stream bytes.
    pub async fn push_handle(&mut self, handle: BlobHandle, len: u64) -> TreeResult<()> {
        self.push_entry(0, LevelEntry { handle, len }).await
    }

    /// Collapse everything and return the root handle.
    ///
    /// A stream small enough to be one chunk has a leaf root; the empty
    /// stream gets an empty leaf root.
    pub async fn finish(mut self) -> TreeResult<BlobHandle> {
        if self.levels.iter().all(|level| level.is_empty()) {
            let root = self.writer.write_blob(ExportKind::Leaf, &[], &[]).await?;
            return Ok(root);
        }

        let mut level = 0;
        loop {
            let is_top = level + 1 >= self.levels.len();
            match self.levels[level].len() {
                0 => {}
                1 if is_top => {
                    let entry = self.levels[level].pop().expect("checked non-empty");
                    debug!(levels = self.levels.len(), len = entry.len, "tree finished");
                    return Ok(entry.handle);
                }
                1 => {
                    // A lone subtree joins the level above directly; no
                    // single-child interior is ever emitted.
                    let entry = self.levels[level].pop().expect("checked non-empty");
                    self.place(level + 1, entry);
                }
                _ => {
                    let group: Vec<LevelEntry> = self.levels[level].drain(..).collect();
                    let entry = self.emit_interior(&group).await?;
                    self.place(level + 1, entry);
                }
            }
            level += 1;
        }
    }

    fn place(&mut self, level: usize, entry: LevelEntry) {
        while self.levels.len() <= level {
            self.levels.push(Vec::new());
        }
        self.levels[level].push(entry);
    }

    async fn push_entry(&mut self, level: usize, entry: LevelEntry) -> TreeResult<()> {
        self.place(level, entry);
        // Cascade: a full level collapses into one interior at the level
        // above, which may itself fill up.
        let mut current = level;
        while self.levels[current].len() >= self.config.max_children {
            let group: Vec<LevelEntry> = self.levels[current].drain(..).collect();
            let parent = self.emit_interior(&group).await?;
            self.place(current + 1, parent);
            current += 1;
        }
        Ok(())
    }

    /// Write one interior export over `group` and return its level entry.
    async fn emit_interior(&mut self, group: &[LevelEntry]) -> BundleResult<LevelEntry> {
        let mut children = Vec::with_capacity(group.len());
        let mut refs = Vec::with_capacity(group.len());
        let mut cumulative = 0u64;
        for entry in group {
            cumulative += entry.len;
            children.push(ChildRef {
                id: entry.handle.hash(),
                end_offset: cumulative,
            });
            refs.push(entry.handle.clone());
        }
        let node = InteriorNode::new(children);
        let handle = self
            .writer
            .write_blob(ExportKind::Interior, &node.encode(), &refs)
            .await?;
        Ok(LevelEntry {
            handle,
            len: cumulative,
        })
    }
}

impl std::fmt::Debug for TreeBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeBuilder")
            .field("levels", &self.levels.len())
            .field(
                "pending",
                &self.levels.iter().map(Vec::len).collect::<Vec<_>>(),
            )
            .finish()
    }
}
