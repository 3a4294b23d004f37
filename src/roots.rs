//! Root detection over the streamed corpus.
//!
//! A single pass tracks three id sets: every known post, every post that is
//! the source of at least one outgoing reference, and every post that is the
//! target of one. Classification falls out of set algebra:
//!
//! - roots = (targets − sources) ∪ isolated
//! - isolated = all − sources − targets
//!
//! Memory is linear in distinct ids, never in corpus size, which is what
//! makes the pass viable on corpora that do not fit in memory. Note the
//! deliberate asymmetry: a post with any outgoing reference is never a root,
//! even when it is itself heavily referenced. That matches the upstream
//! dataset convention for "thread root" and is kept as-is.

use std::collections::{BTreeSet, HashSet};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use tracing::info;

use crate::checkpoint::AtomicFile;
use crate::types::{PostId, PostRecord};

/// Errors from root detection and roots-file I/O.
#[derive(Debug, thiserror::Error)]
pub enum RootsError {
    /// Underlying file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A line of the roots file could not be parsed.
    #[error("invalid roots file entry at line {line}: {source}")]
    InvalidEntry {
        /// 1-based line number of the bad entry.
        line: u64,
        /// Parse failure.
        source: serde_json::Error,
    },
}

/// Streaming accumulator classifying posts into roots, connected, and
/// isolated ids.
///
/// Feed every corpus record through [`observe`](Self::observe); partial
/// scans from parallel workers combine with [`merge`](Self::merge).
#[derive(Debug, Default, Clone)]
pub struct RootScan {
    all: HashSet<PostId>,
    sources: HashSet<PostId>,
    targets: HashSet<PostId>,
}

impl RootScan {
    /// Create an empty scan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one post and its outgoing references.
    pub fn observe(&mut self, post: &PostRecord) {
        self.all.insert(post.post_id);

        let mut has_edge = false;
        for (_, dst) in post.references() {
            self.targets.insert(dst);
            has_edge = true;
        }
        if has_edge {
            self.sources.insert(post.post_id);
        }
    }

    /// Fold another partial scan into this one (set union per component).
    pub fn merge(&mut self, other: Self) {
        self.all.extend(other.all);
        self.sources.extend(other.sources);
        self.targets.extend(other.targets);
    }

    /// Roots: posts reached only as targets, plus isolated posts.
    ///
    /// Sorted ascending, matching the persisted roots file order.
    pub fn roots(&self) -> BTreeSet<PostId> {
        let mut roots: BTreeSet<PostId> = self
            .targets
            .difference(&self.sources)
            .copied()
            .collect();
        roots.extend(self.isolated());
        roots
    }

    /// Isolated (threadless) posts: no reference in either direction.
    pub fn isolated(&self) -> BTreeSet<PostId> {
        self.all
            .iter()
            .filter(|id| !self.sources.contains(id) && !self.targets.contains(id))
            .copied()
            .collect()
    }

    /// Number of distinct known post ids.
    pub fn num_posts(&self) -> usize {
        self.all.len()
    }

    /// Number of posts with at least one outgoing reference.
    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    /// Number of posts referenced by at least one other post.
    pub fn num_targets(&self) -> usize {
        self.targets.len()
    }

    /// Write the roots file: one JSON-encoded integer per line, ascending,
    /// committed atomically.
    pub fn write_roots(&self, path: impl AsRef<Path>) -> Result<(), RootsError> {
        let roots = self.roots();
        let mut file = AtomicFile::create(&path)?;
        for root in &roots {
            writeln!(file, "{}", root.as_u64())?;
        }
        file.commit()?;

        info!(
            path = %path.as_ref().display(),
            roots = roots.len(),
            "wrote roots file"
        );
        Ok(())
    }

    /// Write the threadless lookup file: one plain id per line, ascending,
    /// committed atomically. Consumed by the corpus minimizer.
    pub fn write_threadless(&self, path: impl AsRef<Path>) -> Result<(), RootsError> {
        let isolated = self.isolated();
        let mut file = AtomicFile::create(&path)?;
        for id in &isolated {
            writeln!(file, "{}", id.as_u64())?;
        }
        file.commit()?;

        info!(
            path = %path.as_ref().display(),
            threadless = isolated.len(),
            "wrote threadless lookup file"
        );
        Ok(())
    }
}

/// Load a roots file back into memory, preserving file order.
pub fn load_roots(path: impl AsRef<Path>) -> Result<Vec<PostId>, RootsError> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut roots = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let id: PostId =
            serde_json::from_str(trimmed).map_err(|source| RootsError::InvalidEntry {
                line: idx as u64 + 1,
                source,
            })?;
        roots.push(id);
    }

    Ok(roots)
}
