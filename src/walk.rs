//! Layered BFS walk engine.
//!
//! Explores the reverse adjacency breadth-first from a root, grouping
//! visited posts by depth layer.
//!
//! ## Algorithm
//!
//! 1. Seed the FIFO queue with `(root, depth 0)` and the visited set with
//!    the root
//! 2. On dequeue, record the post into its depth layer
//! 3. If a `max_depth` bound is set and reached, record but do not expand
//! 4. Otherwise enqueue every unvisited neighbor at `depth + 1`, marking it
//!    visited at enqueue time
//! 5. Terminate when the queue drains
//!
//! ## Determinism
//!
//! Within a layer, post order is discovery order: the order neighbors come
//! back from the index, which follows edge-extraction order. Given a fixed
//! reverse index, the same root always yields the same walk.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::index::AdjacencySource;
use crate::types::{PostId, WalkRecord};

/// Walk engine over a shared, read-only adjacency source.
///
/// Cheap to clone; traversal workers each hold one over the same index.
#[derive(Debug, Clone)]
pub struct WalkEngine<A: AdjacencySource> {
    index: Arc<A>,
    max_depth: Option<u32>,
}

impl<A: AdjacencySource> WalkEngine<A> {
    /// Create an engine with unbounded depth.
    pub fn new(index: Arc<A>) -> Self {
        Self {
            index,
            max_depth: None,
        }
    }

    /// Bound traversal depth. Posts at the bound are recorded but treated
    /// as leaves; `None` removes the bound.
    pub fn with_max_depth(mut self, max_depth: Option<u32>) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Configured depth bound, if any.
    pub fn max_depth(&self) -> Option<u32> {
        self.max_depth
    }

    /// Traverse from `root`, producing its walk record.
    ///
    /// Always terminates: the visited set strictly grows and the graph is
    /// finite. A root with no incoming references yields a singleton walk.
    pub fn traverse(&self, root: PostId) -> WalkRecord {
        let mut visited: HashSet<PostId> = HashSet::from([root]);
        let mut walk_path: BTreeMap<u32, Vec<PostId>> = BTreeMap::new();
        let mut queue: VecDeque<(PostId, u32)> = VecDeque::from([(root, 0)]);
        let mut max_found_depth = 0;

        while let Some((node, depth)) = queue.pop_front() {
            walk_path.entry(depth).or_default().push(node);
            max_found_depth = max_found_depth.max(depth);

            if let Some(limit) = self.max_depth {
                if depth >= limit {
                    continue;
                }
            }

            for &nbr in self.index.neighbors(node) {
                if visited.insert(nbr) {
                    queue.push_back((nbr, depth + 1));
                }
            }
        }

        WalkRecord {
            start_node: root,
            walk_length: visited.len(),
            walk_depth: max_found_depth,
            walk_path,
        }
    }
}
