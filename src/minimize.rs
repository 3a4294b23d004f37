//! Corpus minimization: drop excluded posts from a partitioned corpus.
//!
//! Reads every `.jsonl` file under an input directory, removes lines whose
//! `post_id` appears in an exclusion lookup (typically the threadless-post
//! list), and concatenates the survivors into one output file. Input files
//! are batched through the batch driver; each batch filters into its own
//! partial file, and partials are concatenated in submission order so the
//! output is deterministic for a fixed directory listing. The final file is
//! committed atomically.

use std::collections::HashSet;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::checkpoint::AtomicFile;
use crate::driver::{BatchDriver, DriverReport};
use crate::types::{PostId, PostRecord};

/// Errors from the minimization stage.
#[derive(Debug, thiserror::Error)]
pub enum MinimizeError {
    /// Underlying file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Driver failure.
    #[error("driver error: {0}")]
    Driver(#[from] crate::driver::DriverError),
    /// An exclusion entry was not a post id.
    #[error("invalid exclusion entry on line {line}: {entry:?}")]
    InvalidExclusion {
        /// 1-based line number in the lookup file.
        line: usize,
        /// The offending entry text.
        entry: String,
    },
}

/// Counters from a minimization run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MinimizeStats {
    /// Lines copied to the output.
    pub kept: u64,
    /// Lines dropped because their post id was excluded.
    pub removed: u64,
    /// Lines dropped because they failed to parse.
    pub invalid: u64,
}

impl MinimizeStats {
    fn absorb(&mut self, other: Self) {
        self.kept += other.kept;
        self.removed += other.removed;
        self.invalid += other.invalid;
    }
}

/// Load an exclusion lookup: one post id per line, blank lines ignored.
///
/// This is the format `write_threadless` produces, so the threadless
/// artifact feeds straight back in.
pub fn load_exclusions(path: impl AsRef<Path>) -> Result<HashSet<PostId>, MinimizeError> {
    let reader = BufReader::new(std::fs::File::open(path.as_ref())?);
    let mut ids = HashSet::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let entry = line.trim();
        if entry.is_empty() {
            continue;
        }
        let id: u64 = entry.parse().map_err(|_| MinimizeError::InvalidExclusion {
            line: idx + 1,
            entry: entry.to_string(),
        })?;
        ids.insert(PostId::new(id));
    }
    Ok(ids)
}

/// List the `.jsonl` files under `dir`, sorted by path so batching is
/// deterministic across runs.
fn list_corpus_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "jsonl") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Filter one batch of corpus files into `partial`, returning counters.
fn filter_batch(
    files: &[PathBuf],
    exclusions: &HashSet<PostId>,
    partial: &Path,
) -> std::io::Result<MinimizeStats> {
    let mut out = BufWriter::new(std::fs::File::create(partial)?);
    let mut stats = MinimizeStats::default();

    for path in files {
        let reader = BufReader::new(std::fs::File::open(path)?);
        for line in reader.lines() {
            let line = line?;
            let Ok(record) = serde_json::from_str::<PostRecord>(&line) else {
                stats.invalid += 1;
                continue;
            };
            if exclusions.contains(&record.post_id) {
                stats.removed += 1;
                continue;
            }
            out.write_all(line.as_bytes())?;
            out.write_all(b"\n")?;
            stats.kept += 1;
        }
    }
    out.flush()?;
    Ok(stats)
}

/// Minimize the partitioned corpus under `input_dir` against `exclusions`,
/// writing survivors to `output`.
///
/// Partial files live in a `.minimize` directory beside the output and are
/// removed once concatenated; the output appears only on success.
pub fn minimize_corpus(
    driver: &BatchDriver,
    input_dir: impl AsRef<Path>,
    output: impl AsRef<Path>,
    exclusions: HashSet<PostId>,
) -> Result<(MinimizeStats, DriverReport), MinimizeError> {
    let output = output.as_ref();
    let files = list_corpus_files(input_dir.as_ref())?;
    info!(
        files = files.len(),
        excluded = exclusions.len(),
        "minimizing corpus"
    );

    let partials_dir = output
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(".minimize");
    std::fs::create_dir_all(&partials_dir)?;

    let exclusions = Arc::new(exclusions);
    let partials_dir_ref = &partials_dir;
    let worker_exclusions = Arc::clone(&exclusions);
    let worker = move |seq: usize, batch: Vec<PathBuf>| {
        let partial = partials_dir_ref.join(format!("part-{seq}.jsonl"));
        let stats =
            filter_batch(&batch, &worker_exclusions, &partial).map_err(|e| e.to_string())?;
        Ok::<_, String>((stats, partial))
    };

    let (parts, report) = driver.run_collect(files.into_iter(), worker)?;

    let mut totals = MinimizeStats::default();
    let mut out = AtomicFile::create(output)?;
    for (stats, partial) in parts {
        totals.absorb(stats);
        let mut reader = std::fs::File::open(&partial)?;
        std::io::copy(&mut reader, &mut out)?;
        std::fs::remove_file(&partial)?;
    }
    out.commit()?;
    if std::fs::remove_dir(&partials_dir).is_err() {
        warn!(dir = %partials_dir.display(), "leftover partials not removed");
    }

    info!(
        kept = totals.kept,
        removed = totals.removed,
        invalid = totals.invalid,
        "minimization complete"
    );
    Ok((totals, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_partition(dir: &Path) {
        std::fs::write(
            dir.join("10.jsonl"),
            concat!(
                r#"{"post_id": 1, "user_id": 10}"#,
                "\n",
                r#"{"post_id": 3, "user_id": 10}"#,
                "\n",
            ),
        )
        .unwrap();
        std::fs::write(
            dir.join("20.jsonl"),
            concat!(
                r#"{"post_id": 2, "user_id": 20}"#,
                "\n",
                "garbage\n",
                r#"{"post_id": 5, "user_id": 20}"#,
                "\n",
            ),
        )
        .unwrap();
        // Not .jsonl, must be ignored
        std::fs::write(dir.join("notes.txt"), "ignore me\n").unwrap();
    }

    #[test]
    fn test_load_exclusions_parses_plain_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("threadless.jsonl");
        std::fs::write(&path, "3\n\n5\n").unwrap();

        let ids = load_exclusions(&path).unwrap();
        assert_eq!(ids, HashSet::from([PostId::new(3), PostId::new(5)]));
    }

    #[test]
    fn test_load_exclusions_rejects_non_numeric() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("threadless.jsonl");
        std::fs::write(&path, "3\nnope\n").unwrap();

        let err = load_exclusions(&path).unwrap_err();
        assert!(matches!(
            err,
            MinimizeError::InvalidExclusion { line: 2, .. }
        ));
    }

    #[test]
    fn test_minimize_drops_excluded_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("by_user");
        std::fs::create_dir_all(&input).unwrap();
        seed_partition(&input);

        let output = dir.path().join("minimized.jsonl");
        let driver = BatchDriver::new(2, 1).unwrap();
        let exclusions = HashSet::from([PostId::new(3), PostId::new(5)]);

        let (stats, report) = minimize_corpus(&driver, &input, &output, exclusions).unwrap();

        assert!(report.all_ok());
        assert_eq!(stats.kept, 2);
        assert_eq!(stats.removed, 2);
        assert_eq!(stats.invalid, 1);

        let content = std::fs::read_to_string(&output).unwrap();
        let ids: Vec<u64> = content
            .lines()
            .map(|l| serde_json::from_str::<PostRecord>(l).unwrap().post_id.as_u64())
            .collect();
        // Batches replay in submission order over the sorted file list
        assert_eq!(ids, vec![1, 2]);
        assert!(!dir.path().join(".minimize").exists());
    }

    #[test]
    fn test_empty_exclusions_copies_valid_lines() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("by_user");
        std::fs::create_dir_all(&input).unwrap();
        seed_partition(&input);

        let output = dir.path().join("minimized.jsonl");
        let driver = BatchDriver::new(1, 8).unwrap();
        let (stats, _) = minimize_corpus(&driver, &input, &output, HashSet::new()).unwrap();

        assert_eq!(stats.kept, 4);
        assert_eq!(stats.removed, 0);
    }
}
