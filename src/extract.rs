//! Edge extraction: first pass over the raw corpus.
//!
//! Streams the corpus once, emitting one [`EdgeRecord`] line per non-null
//! reference field in the fixed order reply_to, quotes, repost_from, and
//! feeding the root scan in the same pass. Extraction is a pure function of
//! the corpus: re-running it over unchanged input produces a byte-identical
//! edge file.

use std::io::Write;
use std::path::Path;

use tracing::info;

use crate::checkpoint::AtomicFile;
use crate::corpus::CorpusReader;
use crate::roots::RootScan;

/// Counters from one extraction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    /// Valid post records consumed.
    pub posts: u64,
    /// Edges written to the edge file.
    pub edges: u64,
    /// Malformed corpus lines skipped.
    pub skipped: u64,
}

/// Errors from the extraction pass.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// Underlying file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// An edge record could not be serialized.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Stream the corpus at `posts_path`, writing the edge file and feeding
/// `scan` with every record.
///
/// The edge file is committed atomically; an interrupted extraction leaves
/// the previous artifact (or none) in place. Malformed lines are skipped
/// and counted by the reader, never fatal.
pub fn extract_edges(
    posts_path: impl AsRef<Path>,
    edges_path: impl AsRef<Path>,
    scan: &mut RootScan,
) -> Result<ExtractStats, ExtractError> {
    let posts_path = posts_path.as_ref();
    let edges_path = edges_path.as_ref();
    info!(
        posts = %posts_path.display(),
        edges = %edges_path.display(),
        "extracting edges"
    );

    let mut reader = CorpusReader::open(posts_path)?;
    let mut out = AtomicFile::create(edges_path)?;
    let mut stats = ExtractStats::default();

    for record in reader.by_ref() {
        let record = record?;
        stats.posts += 1;
        scan.observe(&record);

        for (kind, dst) in record.references() {
            let edge = crate::types::Edge::new(record.post_id, dst, kind).to_record();
            serde_json::to_writer(&mut out, &edge)?;
            out.write_all(b"\n")?;
            stats.edges += 1;
        }
    }

    stats.skipped = reader.skipped();
    out.commit()?;

    info!(
        posts = stats.posts,
        edges = stats.edges,
        skipped = stats.skipped,
        "edge extraction complete"
    );
    Ok(stats)
}
