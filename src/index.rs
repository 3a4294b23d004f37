//! Reverse adjacency index: referenced post -> referencing posts.
//!
//! Built once per corpus snapshot by inverting the edge stream, then treated
//! as immutable and shared read-only across traversal workers. Sources
//! accumulate per target in edge-file order; that order is what makes walk
//! layers reproducible, so it is preserved through persistence and reload.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::checkpoint::{file_fingerprint, AtomicFile};
use crate::types::{EdgeRecord, PostId};

/// Read-only neighbor lookup used by the walk engine.
///
/// `neighbors(id)` returns the posts referencing `id`; ids absent from the
/// index yield an empty slice, never an error (dangling references are
/// normal).
pub trait AdjacencySource {
    /// Posts that reference `id`, in edge-extraction order.
    fn neighbors(&self, id: PostId) -> &[PostId];
}

/// Errors from building, persisting, or loading the reverse index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Underlying file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A derived artifact contained an unreadable line. Unlike raw corpus
    /// lines, these files are pipeline-owned, so corruption is fatal.
    #[error("corrupt record in {path} at line {line}: {source}")]
    Corrupt {
        /// Artifact containing the bad line.
        path: PathBuf,
        /// 1-based line number.
        line: u64,
        /// Parse failure.
        source: serde_json::Error,
    },
}

/// One persisted snapshot line: a target and its full source list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ReverseRecord {
    target: PostId,
    sources: Vec<PostId>,
}

/// Sidecar metadata tying a snapshot to the edge file it was built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotMeta {
    edges_fingerprint: String,
    targets: u64,
}

/// Reverse adjacency index over the post reference graph.
///
/// Keyed by `BTreeMap` so snapshot output and iteration are deterministic.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReverseIndex {
    adjacency: BTreeMap<PostId, Vec<PostId>>,
}

impl ReverseIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `src` to the source list of `dst`. Repeated targets
    /// accumulate; nothing is overwritten.
    pub fn insert_edge(&mut self, src: PostId, dst: PostId) {
        self.adjacency.entry(dst).or_default().push(src);
    }

    /// Number of distinct targets with at least one incoming reference.
    pub fn num_targets(&self) -> usize {
        self.adjacency.len()
    }

    /// Total number of edges in the index.
    pub fn num_edges(&self) -> usize {
        self.adjacency.values().map(Vec::len).sum()
    }

    /// True when the index holds no edges.
    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    /// Build the index by streaming an edge file.
    pub fn from_edge_file(edges_path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let edges_path = edges_path.as_ref();
        let reader = BufReader::new(std::fs::File::open(edges_path)?);
        let mut index = Self::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let edge: EdgeRecord =
                serde_json::from_str(&line).map_err(|source| IndexError::Corrupt {
                    path: edges_path.to_path_buf(),
                    line: idx as u64 + 1,
                    source,
                })?;
            index.insert_edge(edge.src, edge.dst);
        }

        info!(
            edges = %edges_path.display(),
            targets = index.num_targets(),
            "built reverse index"
        );
        Ok(index)
    }

    /// Persist the index as one `{"target", "sources"}` record per line,
    /// sorted by target, committed atomically.
    pub fn save(&self, snapshot_path: impl AsRef<Path>) -> Result<(), IndexError> {
        let snapshot_path = snapshot_path.as_ref();
        let mut out = AtomicFile::create(snapshot_path)?;

        for (target, sources) in &self.adjacency {
            let record = ReverseRecord {
                target: *target,
                sources: sources.clone(),
            };
            serde_json::to_writer(&mut out, &record)
                .map_err(|source| IndexError::Corrupt {
                    path: snapshot_path.to_path_buf(),
                    line: 0,
                    source,
                })?;
            out.write_all(b"\n")?;
        }
        out.commit()?;

        info!(
            snapshot = %snapshot_path.display(),
            targets = self.num_targets(),
            "saved reverse index snapshot"
        );
        Ok(())
    }

    /// Reconstruct an index from a persisted snapshot.
    ///
    /// The loaded structure is behaviorally identical to the freshly-built
    /// one: same targets, same source sequences, same order.
    pub fn load(snapshot_path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let snapshot_path = snapshot_path.as_ref();
        let reader = BufReader::new(std::fs::File::open(snapshot_path)?);
        let mut index = Self::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: ReverseRecord =
                serde_json::from_str(&line).map_err(|source| IndexError::Corrupt {
                    path: snapshot_path.to_path_buf(),
                    line: idx as u64 + 1,
                    source,
                })?;
            index.adjacency.insert(record.target, record.sources);
        }

        info!(
            snapshot = %snapshot_path.display(),
            targets = index.num_targets(),
            "loaded reverse index snapshot"
        );
        Ok(index)
    }

    /// Load the snapshot if it exists and still matches the edge file,
    /// otherwise rebuild from the edge file and persist a fresh snapshot
    /// plus its fingerprint sidecar.
    pub fn load_or_build(
        edges_path: impl AsRef<Path>,
        snapshot_path: impl AsRef<Path>,
    ) -> Result<Self, IndexError> {
        let edges_path = edges_path.as_ref();
        let snapshot_path = snapshot_path.as_ref();
        let meta_path = meta_path_for(snapshot_path);
        let edges_fingerprint = file_fingerprint(edges_path)?;

        if snapshot_path.exists() {
            match load_meta(&meta_path) {
                Some(meta) if meta.edges_fingerprint == edges_fingerprint => {
                    return Self::load(snapshot_path);
                }
                Some(_) => {
                    warn!(
                        snapshot = %snapshot_path.display(),
                        "reverse index snapshot is stale, rebuilding"
                    );
                }
                None => {
                    // No sidecar (older run): trust the existing snapshot
                    return Self::load(snapshot_path);
                }
            }
        }

        let index = Self::from_edge_file(edges_path)?;
        index.save(snapshot_path)?;

        let meta = SnapshotMeta {
            edges_fingerprint,
            targets: index.num_targets() as u64,
        };
        let mut out = AtomicFile::create(&meta_path)?;
        serde_json::to_writer(&mut out, &meta).map_err(|source| IndexError::Corrupt {
            path: meta_path.clone(),
            line: 0,
            source,
        })?;
        out.commit()?;

        Ok(index)
    }
}

impl AdjacencySource for ReverseIndex {
    fn neighbors(&self, id: PostId) -> &[PostId] {
        self.adjacency.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn meta_path_for(snapshot_path: &Path) -> PathBuf {
    let mut meta = snapshot_path.to_path_buf().into_os_string();
    meta.push(".meta");
    PathBuf::from(meta)
}

fn load_meta(meta_path: &Path) -> Option<SnapshotMeta> {
    let file = std::fs::File::open(meta_path).ok()?;
    serde_json::from_reader(BufReader::new(file)).ok()
}
