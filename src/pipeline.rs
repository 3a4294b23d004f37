//! End-to-end pipeline orchestration.
//!
//! Runs the stages in dependency order, reusing artifacts that already
//! exist:
//!
//! 1. Extract edges, roots, and the threadless lookup from the raw corpus
//!    (skipped when the edge and roots artifacts are both present)
//! 2. Build or load the reverse-index snapshot
//! 3. Stream roots, skip those already present in the walks file, and
//!    dispatch the rest in batches to traversal workers over the shared
//!    read-only index
//!
//! Each completed walk is appended to the aggregated walks file and
//! mirrored as an individual `<root_id>.json`. The aggregated file doubles
//! as the resume marker, so a killed run picks up where it stopped.

use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::checkpoint::{load_processed_roots, AtomicFile};
use crate::config::PipelineConfig;
use crate::driver::BatchDriver;
use crate::extract::extract_edges;
use crate::index::ReverseIndex;
use crate::roots::{load_roots, RootScan};
use crate::types::{PostId, WalkRecord};
use crate::walk::WalkEngine;

/// Progress is logged every this many completed walks.
const PROGRESS_INTERVAL: u64 = 1000;

/// Errors from a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Underlying file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    /// Edge extraction failed.
    #[error(transparent)]
    Extract(#[from] crate::extract::ExtractError),
    /// Roots artifact I/O failed.
    #[error(transparent)]
    Roots(#[from] crate::roots::RootsError),
    /// Reverse-index build or load failed.
    #[error(transparent)]
    Index(#[from] crate::index::IndexError),
    /// Driver setup or sink failure.
    #[error(transparent)]
    Driver(#[from] crate::driver::DriverError),
    /// One or more walk batches failed; completed work is durable, the run
    /// as a whole is not successful.
    #[error("{failed} walk batch(es) failed")]
    BatchesFailed {
        /// Number of failed batches.
        failed: usize,
    },
}

/// Final accounting for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Roots present in the roots artifact.
    pub roots_total: usize,
    /// Walks completed and appended this run.
    pub walks_written: u64,
    /// Roots skipped because a walk record already existed.
    pub skipped_existing: usize,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

/// The full traversal pipeline.
pub struct WalkPipeline {
    config: PipelineConfig,
}

impl WalkPipeline {
    /// Create a pipeline over a validated configuration.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Run every stage, returning the final accounting.
    pub fn run(&self) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        self.ensure_extracted()?;

        let index = Arc::new(ReverseIndex::load_or_build(
            &self.config.edges,
            &self.config.snapshot,
        )?);

        let roots = load_roots(&self.config.roots)?;
        let processed = load_processed_roots(&self.config.walks)?;
        let pending: Vec<PostId> = roots
            .iter()
            .copied()
            .filter(|root| !processed.contains(root))
            .collect();
        let skipped_existing = roots.len() - pending.len();

        info!(
            roots = roots.len(),
            pending = pending.len(),
            skipped = skipped_existing,
            "starting walk stage"
        );

        let walks_written = self.run_walks(index, pending)?;

        let summary = RunSummary {
            roots_total: roots.len(),
            walks_written,
            skipped_existing,
            elapsed: started.elapsed(),
        };
        info!(
            walks = summary.walks_written,
            skipped = summary.skipped_existing,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "pipeline run complete"
        );
        Ok(summary)
    }

    /// Run extraction when the edge or roots artifact is missing.
    fn ensure_extracted(&self) -> Result<(), PipelineError> {
        if self.config.edges.exists() && self.config.roots.exists() {
            info!("edge and roots artifacts present, skipping extraction");
            return Ok(());
        }

        let mut scan = RootScan::new();
        extract_edges(&self.config.posts, &self.config.edges, &mut scan)?;
        scan.write_roots(&self.config.roots)?;
        scan.write_threadless(&self.config.threadless)?;
        Ok(())
    }

    /// Dispatch pending roots to traversal workers, appending results.
    fn run_walks(
        &self,
        index: Arc<ReverseIndex>,
        pending: Vec<PostId>,
    ) -> Result<u64, PipelineError> {
        std::fs::create_dir_all(&self.config.walks_dir)?;
        trim_torn_tail(&self.config.walks)?;

        let driver = BatchDriver::new(self.config.workers, self.config.batch_size)?;
        let engine = WalkEngine::new(index).with_max_depth(self.config.max_depth);

        let walks_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.walks)?;
        let mut walks_out = BufWriter::new(walks_file);

        let mut walks_written = 0u64;
        let mut next_progress = PROGRESS_INTERVAL;

        let report = driver.run(
            pending.into_iter(),
            |_, batch: Vec<PostId>| {
                let records: Vec<WalkRecord> =
                    batch.into_iter().map(|root| engine.traverse(root)).collect();
                Ok::<_, std::convert::Infallible>(records)
            },
            |_, records| {
                for record in records {
                    let line = serde_json::to_string(&record).map_err(std::io::Error::other)?;
                    walks_out.write_all(line.as_bytes())?;
                    walks_out.write_all(b"\n")?;

                    let per_root = self
                        .config
                        .walks_dir
                        .join(format!("{}.json", record.start_node));
                    let mut out = AtomicFile::create(per_root)?;
                    out.write_all(line.as_bytes())?;
                    out.commit()?;

                    walks_written += 1;
                }
                // A record only counts as durable once the batch is flushed
                walks_out.flush()?;

                while walks_written >= next_progress {
                    info!(walks = walks_written, "walk progress");
                    next_progress += PROGRESS_INTERVAL;
                }
                Ok(())
            },
        )?;

        walks_out.flush()?;

        if !report.failures.is_empty() {
            error!(
                failed = report.failures.len(),
                completed = report.completed,
                "walk stage finished with failures"
            );
            return Err(PipelineError::BatchesFailed {
                failed: report.failures.len(),
            });
        }
        Ok(walks_written)
    }
}

/// Drop a torn trailing partial line left behind by a killed append.
///
/// Appending after a partial line would fuse two records into one
/// unparseable line; the torn record was never counted as processed, so
/// dropping it just re-walks its root.
fn trim_torn_tail(path: &Path) -> std::io::Result<()> {
    let mut file = match std::fs::OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }

    let mut end = len;
    let mut buf = [0u8; 4096];
    loop {
        let start = end.saturating_sub(buf.len() as u64);
        let n = (end - start) as usize;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf[..n])?;

        if let Some(pos) = buf[..n].iter().rposition(|&b| b == b'\n') {
            let keep = start + pos as u64 + 1;
            if keep < len {
                warn!(
                    path = %path.display(),
                    dropped_bytes = len - keep,
                    "dropped torn trailing walk record"
                );
                file.set_len(keep)?;
            }
            return Ok(());
        }
        if start == 0 {
            warn!(path = %path.display(), "walks file held no complete record, clearing");
            file.set_len(0)?;
            return Ok(());
        }
        end = start;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_tree_corpus(dir: &Path) -> PipelineConfig {
        let posts = dir.join("posts.jsonl");
        let lines = [
            r#"{"post_id": 1}"#,
            r#"{"post_id": 2, "reply_to": 1}"#,
            r#"{"post_id": 3, "reply_to": 2}"#,
            r#"{"post_id": 4, "reply_to": 3}"#,
            r#"{"post_id": 5, "reply_to": 2}"#,
            r#"{"post_id": 6, "reply_to": 2}"#,
        ];
        std::fs::write(&posts, lines.join("\n") + "\n").unwrap();

        PipelineConfig {
            posts,
            edges: dir.join("edges.jsonl"),
            roots: dir.join("roots.jsonl"),
            threadless: dir.join("threadless.jsonl"),
            snapshot: dir.join("reverse_edges.jsonl"),
            walks: dir.join("walks.jsonl"),
            walks_dir: dir.join("reverse_walks"),
            workers: 2,
            batch_size: 2,
            max_open: 10,
            max_depth: None,
        }
    }

    #[test]
    fn test_end_to_end_reply_tree() {
        let dir = tempfile::tempdir().unwrap();
        let config = reply_tree_corpus(dir.path());

        let summary = WalkPipeline::new(config.clone()).unwrap().run().unwrap();
        assert_eq!(summary.roots_total, 1);
        assert_eq!(summary.walks_written, 1);
        assert_eq!(summary.skipped_existing, 0);

        let walks = std::fs::read_to_string(&config.walks).unwrap();
        assert_eq!(
            walks,
            concat!(
                r#"{"start_node":1,"walk_length":6,"walk_depth":3,"#,
                r#""walk_path":{"0":[1],"1":[2],"2":[3,5,6],"3":[4]}}"#,
                "\n",
            )
        );

        // Per-root mirror holds the same record
        let mirror = std::fs::read_to_string(config.walks_dir.join("1.json")).unwrap();
        assert_eq!(mirror, walks.trim_end());
    }

    #[test]
    fn test_second_run_skips_processed_roots() {
        let dir = tempfile::tempdir().unwrap();
        let config = reply_tree_corpus(dir.path());
        let pipeline = WalkPipeline::new(config.clone()).unwrap();

        pipeline.run().unwrap();
        let first = std::fs::read_to_string(&config.walks).unwrap();

        let summary = pipeline.run().unwrap();
        assert_eq!(summary.walks_written, 0);
        assert_eq!(summary.skipped_existing, 1);
        assert_eq!(std::fs::read_to_string(&config.walks).unwrap(), first);
    }

    #[test]
    fn test_max_depth_bounds_walks() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = reply_tree_corpus(dir.path());
        config.max_depth = Some(1);

        WalkPipeline::new(config.clone()).unwrap().run().unwrap();
        let walks = std::fs::read_to_string(&config.walks).unwrap();
        assert_eq!(
            walks,
            concat!(
                r#"{"start_node":1,"walk_length":2,"walk_depth":1,"#,
                r#""walk_path":{"0":[1],"1":[2]}}"#,
                "\n",
            )
        );
    }

    #[test]
    fn test_threadless_artifact_written() {
        let dir = tempfile::tempdir().unwrap();
        let config = reply_tree_corpus(dir.path());
        // Add an isolated post
        let mut corpus = std::fs::read_to_string(&config.posts).unwrap();
        corpus.push_str("{\"post_id\": 99}\n");
        std::fs::write(&config.posts, corpus).unwrap();

        WalkPipeline::new(config.clone()).unwrap().run().unwrap();
        assert_eq!(
            std::fs::read_to_string(&config.threadless).unwrap(),
            "99\n"
        );
    }

    #[test]
    fn test_trim_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("walks.jsonl");

        // Missing file is fine
        trim_torn_tail(&path).unwrap();

        std::fs::write(&path, "complete\npartial").unwrap();
        trim_torn_tail(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "complete\n");

        // Already newline-terminated content is untouched
        trim_torn_tail(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "complete\n");

        // A file with no newline at all is cleared
        std::fs::write(&path, "partial-only").unwrap();
        trim_torn_tail(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_invalid_config_rejected_before_work() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = reply_tree_corpus(dir.path());
        config.workers = 0;

        assert!(WalkPipeline::new(config.clone()).is_err());
        assert!(!config.edges.exists());
    }
}
