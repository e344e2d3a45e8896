use bytes::Bytes;

use bale_bundle::{BundleSource, ExportKind, FlushedLocation};

use crate::error::{TreeError, TreeResult};
use crate::node::{InteriorNode, TreeNode};

/// Lazy, restartable, in-order byte stream over a sealed chunk tree.
///
/// Walks the tree depth-first, yielding one leaf's bytes (or a slice of
/// them) per [`next_segment`] call. Starting a fresh stream from the same
/// root restarts the sequence. Offset-addressed reads are the same walk
/// with `skip`/`take` bounds: subtrees that fall entirely before the
/// requested range are skipped without being fetched wherever interior
/// nodes carry cumulative offsets.
///
/// [`next_segment`]: TreeStream::next_segment
pub struct TreeStream<'s> {
    source: &'s BundleSource,
    /// Pending locations, depth-first (top of stack is next).
    stack: Vec<FlushedLocation>,
    /// Stream bytes still to discard before emitting.
    to_skip: u64,
    /// Bytes still to emit; `None` means unbounded.
    remaining: Option<u64>,
}

impl<'s> TreeStream<'s> {
    /// Stream the whole tree rooted at `root`.
    pub fn new(source: &'s BundleSource, root: FlushedLocation) -> Self {
        Self {
            source,
            stack: vec![root],
            to_skip: 0,
            remaining: None,
        }
    }

    /// Stream `len` bytes starting at stream offset `offset`.
    pub fn with_range(
        source: &'s BundleSource,
        root: FlushedLocation,
        offset: u64,
        len: u64,
    ) -> Self {
        Self {
            source,
            stack: vec![root],
            to_skip: offset,
            remaining: Some(len),
        }
    }

    /// The next run of stream bytes, or `None` at the end.
    pub async fn next_segment(&mut self) -> TreeResult<Option<Bytes>> {
        loop {
            if self.remaining == Some(0) {
                return Ok(None);
            }
            let Some(location) = self.stack.pop() else {
                return Ok(None);
            };

            let entry = self.source.export_entry(&location).await?;
            let kind = self
                .source
                .bundle(&location.bundle)
                .await?
                .bundle()
                .export_kind(location.export)
                .ok_or_else(|| TreeError::CorruptNode {
                    reason: "export kind missing from type table".into(),
                })?;

            // Whole leaf before the requested range: skip without fetching.
            if kind == ExportKind::Leaf && self.to_skip >= entry.decoded_len {
                self.to_skip -= entry.decoded_len;
                continue;
            }

            let payload = self.source.read_export(&location).await?;
            match TreeNode::decode(kind, &payload)? {
                TreeNode::Leaf(leaf) => {
                    let start = self.to_skip as usize;
                    self.to_skip = 0;

                    let mut slice = leaf.data.slice(start..);
                    if let Some(remaining) = self.remaining.as_mut() {
                        if (slice.len() as u64) >= *remaining {
                            slice = slice.slice(..*remaining as usize);
                            *remaining = 0;
                            self.stack.clear();
                        } else {
                            *remaining -= slice.len() as u64;
                        }
                    }
                    if slice.is_empty() {
                        continue;
                    }
                    return Ok(Some(slice));
                }
                TreeNode::Interior(node) => {
                    let children = self.resolve_children(&location, &node, &entry.refs).await?;

                    // With cumulative offsets, whole leading subtrees that
                    // fall before the skip point are dropped unfetched.
                    let first = if self.to_skip > 0 && node.has_offsets() {
                        match node.seek_child(self.to_skip) {
                            Some((index, start)) => {
                                self.to_skip -= start;
                                index
                            }
                            // Skip point at or past this subtree's end.
                            None => {
                                self.to_skip -= node.total_len();
                                continue;
                            }
                        }
                    } else {
                        0
                    };
                    for child in children[first..].iter().rev() {
                        self.stack.push(*child);
                    }
                }
            }
        }
    }

    /// Resolve an interior node's children to flushed locations, checking
    /// that each referenced export actually holds the hash the node names.
    async fn resolve_children(
        &self,
        location: &FlushedLocation,
        node: &InteriorNode,
        refs: &[bale_bundle::ExportRef],
    ) -> TreeResult<Vec<FlushedLocation>> {
        if refs.len() != node.child_count() {
            return Err(TreeError::CorruptNode {
                reason: format!(
                    "interior node has {} children but its export carries {} refs",
                    node.child_count(),
                    refs.len()
                ),
            });
        }
        let mut children = Vec::with_capacity(refs.len());
        for (child, reference) in node.children.iter().zip(refs) {
            let resolved = self.source.resolve_ref(&location.bundle, reference).await?;
            let entry = self.source.export_entry(&resolved).await?;
            if entry.hash != child.id {
                return Err(TreeError::ChildHashMismatch {
                    expected: child.id,
                    actual: entry.hash,
                });
            }
            children.push(resolved);
        }
        Ok(children)
    }
}

/// Read-side API over sealed chunk trees.
#[derive(Debug)]
pub struct TreeReader<'s> {
    source: &'s BundleSource,
}

impl<'s> TreeReader<'s> {
    /// Create a reader over `source`.
    pub fn new(source: &'s BundleSource) -> Self {
        Self { source }
    }

    /// Lazy in-order stream of the tree at `root`.
    pub fn stream(&self, root: FlushedLocation) -> TreeStream<'s> {
        TreeStream::new(self.source, root)
    }

    /// The whole stream, reassembled.
    pub async fn read_all(&self, root: FlushedLocation) -> TreeResult<Vec<u8>> {
        let mut stream = self.stream(root);
        let mut out = Vec::new();
        while let Some(segment) = stream.next_segment().await? {
            out.extend_from_slice(&segment);
        }
        Ok(out)
    }

    /// Up to `len` bytes starting at stream offset `offset`.
    ///
    /// Shorter than `len` when the range runs past the end of the stream.
    pub async fn read_at(&self, root: FlushedLocation, offset: u64, len: u64) -> TreeResult<Vec<u8>> {
        let mut stream = TreeStream::with_range(self.source, root, offset, len);
        let mut out = Vec::new();
        while let Some(segment) = stream.next_segment().await? {
            out.extend_from_slice(&segment);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use bale_bundle::{BundleWriter, CompressionFormat, WriterConfig};
    use bale_chunk::{Chunker, ChunkerConfig};
    use bale_store::MemoryBlobStore;
    use bale_types::BlobId;

    use crate::builder::{TreeBuilder, TreeConfig};
    use crate::node::InteriorNode;

    fn make_writer() -> BundleWriter {
        let store = Arc::new(MemoryBlobStore::new());
        BundleWriter::new(
            store,
            WriterConfig {
                packet_target_size: 256,
                max_bundle_size: 1024 * 1024,
                compression: CompressionFormat::Fast,
            },
        )
        .unwrap()
    }

    fn tree_config(max_children: usize) -> TreeConfig {
        TreeConfig {
            max_children,
            min_children: 2,
        }
    }

    fn noise(len: usize, seed: u64) -> Vec<u8> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (state >> 56) as u8
            })
            .collect()
    }

    /// Chunk `data`, build its tree, seal, and return the root location.
    async fn build_tree(
        writer: &mut BundleWriter,
        data: &[u8],
        max_children: usize,
    ) -> FlushedLocation {
        let mut cfg = ChunkerConfig::new(32, 64, 96);
        cfg.window_size = 16;
        let chunker = Chunker::new(cfg).unwrap();

        let mut builder = TreeBuilder::new(writer, tree_config(max_children)).unwrap();
        for chunk in chunker.split(data) {
            builder.push_chunk(&chunk.data).await.unwrap();
        }
        let root = builder.finish().await.unwrap();
        writer.flush().await.unwrap();
        root.flushed_location().unwrap()
    }

    #[tokio::test]
    async fn empty_stream_roundtrip() {
        let mut writer = make_writer();
        let root = build_tree(&mut writer, b"", 4).await;
        let reader = TreeReader::new(writer.source());
        assert_eq!(reader.read_all(root).await.unwrap(), b"");
    }

    #[tokio::test]
    async fn single_chunk_stream_has_leaf_root() {
        let mut writer = make_writer();
        let root = build_tree(&mut writer, b"tiny", 4).await;

        let reader = TreeReader::new(writer.source());
        assert_eq!(reader.read_all(root).await.unwrap(), b"tiny");

        let kind = writer
            .source()
            .bundle(&root.bundle)
            .await
            .unwrap()
            .bundle()
            .export_kind(root.export)
            .unwrap();
        assert_eq!(kind, ExportKind::Leaf);
    }

    #[tokio::test]
    async fn multi_level_roundtrip() {
        let mut writer = make_writer();
        let data = noise(20_000, 17);
        let root = build_tree(&mut writer, &data, 3).await;

        let reader = TreeReader::new(writer.source());
        assert_eq!(reader.read_all(root).await.unwrap(), data);
    }

    #[tokio::test]
    async fn interior_child_counts_respect_bounds() {
        let mut writer = make_writer();
        let data = noise(30_000, 29);
        let root = build_tree(&mut writer, &data, 3).await;

        // Walk every interior node; all must have 2..=3 children.
        let reader = TreeReader::new(writer.source());
        let mut stack = vec![root];
        let mut interior_count = 0;
        while let Some(location) = stack.pop() {
            let decoded = writer.source().bundle(&location.bundle).await.unwrap();
            let kind = decoded.bundle().export_kind(location.export).unwrap();
            if kind != ExportKind::Interior {
                continue;
            }
            interior_count += 1;
            let payload = writer.source().read_export(&location).await.unwrap();
            let node = InteriorNode::decode(&payload).unwrap();
            assert!(node.child_count() >= 2 && node.child_count() <= 3);
            let entry = writer.source().export_entry(&location).await.unwrap();
            for reference in &entry.refs {
                stack.push(
                    writer
                        .source()
                        .resolve_ref(&location.bundle, reference)
                        .await
                        .unwrap(),
                );
            }
        }
        assert!(interior_count > 1, "expected a multi-level tree");
        let _ = reader;
    }

    #[tokio::test]
    async fn read_at_matches_slices() {
        let mut writer = make_writer();
        let data = noise(10_000, 5);
        let root = build_tree(&mut writer, &data, 3).await;
        let reader = TreeReader::new(writer.source());

        for (offset, len) in [(0u64, 100u64), (50, 4096), (9_950, 100), (4_321, 1)] {
            let got = reader.read_at(root, offset, len).await.unwrap();
            let end = ((offset + len) as usize).min(data.len());
            assert_eq!(got, &data[offset as usize..end], "range {offset}+{len}");
        }

        // Past-the-end reads are empty.
        assert!(reader.read_at(root, 20_000, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn shared_runs_dedup_across_streams() {
        let mut writer = make_writer();
        let common = noise(4_000, 99);

        let mut stream_a = noise(500, 1);
        stream_a.extend_from_slice(&common);
        let mut stream_b = noise(900, 2);
        stream_b.extend_from_slice(&common);

        build_tree(&mut writer, &stream_a, 4).await;
        let exports_after_a = count_exports(&writer).await;
        let root_b = build_tree(&mut writer, &stream_b, 4).await;
        let exports_after_b = count_exports(&writer).await;

        // The second tree reads back exactly, across bundle boundaries
        // (its interiors import the first tree's shared leaves).
        let reader = TreeReader::new(writer.source());
        assert_eq!(reader.read_all(root_b).await.unwrap(), stream_b);

        // The second stream must reuse leaves of the common run: it adds
        // fewer exports than a from-scratch encoding of itself would.
        let added = exports_after_b - exports_after_a;
        let standalone = {
            let mut fresh = make_writer();
            build_tree(&mut fresh, &stream_b, 4).await;
            count_exports(&fresh).await
        };
        assert!(
            added < standalone,
            "no leaf sharing: added {added}, standalone {standalone}"
        );
    }

    async fn count_exports(writer: &BundleWriter) -> usize {
        let mut total = 0;
        for locator in writer.sealed_bundles() {
            let decoded = writer.source().bundle(locator).await.unwrap();
            total += decoded.bundle().exports.len();
        }
        total
    }

    #[tokio::test]
    async fn legacy_interior_traverses_sequentially() {
        let mut writer = make_writer();

        // Two leaves referenced by a hand-built legacy (v1) interior node.
        let left = writer
            .write_blob(ExportKind::Leaf, b"legacy-left-", &[])
            .await
            .unwrap();
        let right = writer
            .write_blob(ExportKind::Leaf, b"legacy-right", &[])
            .await
            .unwrap();
        let node_bytes = InteriorNode::encode_legacy(&[left.hash(), right.hash()]);
        let root = writer
            .write_blob(ExportKind::Interior, &node_bytes, &[left, right])
            .await
            .unwrap();
        writer.flush().await.unwrap();

        let reader = TreeReader::new(writer.source());
        let location = root.flushed_location().unwrap();
        assert_eq!(
            reader.read_all(location).await.unwrap(),
            b"legacy-left-legacy-right"
        );
        // Offset reads still work, via the sequential fallback.
        assert_eq!(
            reader.read_at(location, 8, 8).await.unwrap(),
            b"eft-lega"
        );
    }

    #[tokio::test]
    async fn child_hash_mismatch_is_detected() {
        let mut writer = make_writer();

        let real = writer
            .write_blob(ExportKind::Leaf, b"real child", &[])
            .await
            .unwrap();
        // The node claims a different child id than the export it refs.
        let bogus = InteriorNode::new(vec![crate::node::ChildRef {
            id: BlobId::from_bytes(b"someone else entirely"),
            end_offset: 10,
        }]);
        let root = writer
            .write_blob(ExportKind::Interior, &bogus.encode(), &[real])
            .await
            .unwrap();
        writer.flush().await.unwrap();

        let reader = TreeReader::new(writer.source());
        let err = reader
            .read_all(root.flushed_location().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, TreeError::ChildHashMismatch { .. }));
    }

    #[tokio::test]
    async fn ref_pins_a_root_for_later_readers() {
        use bale_store::{BlobStore, RefTarget};

        let mut writer = make_writer();
        let data = noise(3_000, 13);
        let root = build_tree(&mut writer, &data, 4).await;

        let store = writer.source().store().clone();
        store
            .write_ref("heads/main", RefTarget::new(root.bundle, root.export))
            .await
            .unwrap();

        // A later reader follows the ref to the same bytes.
        let target = store.read_ref("heads/main").await.unwrap().unwrap();
        let reader = TreeReader::new(writer.source());
        assert_eq!(reader.read_all(target.into()).await.unwrap(), data);
    }

    #[tokio::test]
    async fn incrementing_150_byte_scenario_end_to_end() {
        let mut writer = make_writer();
        let data: Vec<u8> = (0u8..=149).collect();
        let root = build_tree(&mut writer, &data, 4).await;

        let reader = TreeReader::new(writer.source());
        assert_eq!(reader.read_all(root).await.unwrap(), data);
    }
}
