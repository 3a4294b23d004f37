//! Walk records: the per-root output of a layered traversal.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::post::PostId;

/// Result of one layered BFS traversal rooted at a post.
///
/// `walk_path` maps each depth layer to the posts discovered at that depth,
/// in discovery order. Layer keys serialize as strings (`"0"`, `"1"`, ...)
/// to match the artifact schema consumed downstream.
///
/// ## Invariants
///
/// - `walk_path[0] == [start_node]`
/// - every post id appears in exactly one layer
/// - `walk_length` equals the number of distinct visited posts
/// - `walk_depth` equals the highest populated layer index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkRecord {
    /// Root the traversal started from.
    pub start_node: PostId,
    /// Count of distinct posts visited, including the root.
    pub walk_length: usize,
    /// Maximum layer index that received at least one post.
    pub walk_depth: u32,
    /// Depth layer -> posts discovered at that depth, in discovery order.
    pub walk_path: BTreeMap<u32, Vec<PostId>>,
}

impl WalkRecord {
    /// Walk for a root with no incoming references: a single layer
    /// containing only the root itself.
    pub fn singleton(start_node: PostId) -> Self {
        let mut walk_path = BTreeMap::new();
        walk_path.insert(0, vec![start_node]);
        Self {
            start_node,
            walk_length: 1,
            walk_depth: 0,
            walk_path,
        }
    }

    /// Posts at the given depth layer, empty if the layer is absent.
    pub fn layer(&self, depth: u32) -> &[PostId] {
        self.walk_path.get(&depth).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All posts across every layer, in (depth, discovery) order.
    pub fn nodes(&self) -> impl Iterator<Item = PostId> + '_ {
        self.walk_path.values().flatten().copied()
    }

    /// Check the structural invariants listed on this type.
    ///
    /// Walks produced by the engine always satisfy them; this exists for
    /// validating records read back from disk.
    pub fn is_well_formed(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        for id in self.nodes() {
            if !seen.insert(id) {
                return false;
            }
        }

        self.layer(0) == [self.start_node]
            && self.walk_length == seen.len()
            && self.walk_depth == self.walk_path.keys().max().copied().unwrap_or(0)
    }
}
