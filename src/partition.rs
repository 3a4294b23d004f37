//! Per-user corpus partitioning.
//!
//! Splits one large JSONL corpus into one file per `user_id`, routing lines
//! through the bounded handle cache so the split never exhausts file
//! descriptors. Lines are dispatched in batches through the batch driver;
//! the handle discipline decides whether all workers share one cache or
//! each batch writes a partial directory merged afterwards.
//!
//! With the global discipline a byte-offset checkpoint can be maintained:
//! the offset only advances over a contiguous prefix of completed batches,
//! and only after the cache has been flushed, so a resumed run never skips
//! an unprocessed byte range.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::checkpoint::OffsetCheckpoint;
use crate::driver::{BatchDriver, DriverError, DriverReport};
use crate::handles::{FileHandleCache, HandleDiscipline, HandleError};
use crate::types::PostRecord;

/// Offset checkpoints are written every this many contiguous batches.
const CHECKPOINT_INTERVAL: usize = 32;

/// Errors from the partition stage.
#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    /// Underlying file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Handle cache failure.
    #[error("handle cache error: {0}")]
    Handle(#[from] HandleError),
    /// Driver failure.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
}

/// Configuration for one partition run.
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    /// Input corpus (JSONL, one post per line).
    pub input: PathBuf,
    /// Destination directory for `<user_id>.jsonl` files.
    pub out_dir: PathBuf,
    /// Maximum simultaneously open output handles.
    pub max_open: usize,
    /// Cache sharing discipline.
    pub discipline: HandleDiscipline,
    /// Optional byte-offset progress marker (global discipline only).
    pub checkpoint: Option<PathBuf>,
}

/// Counters from a partition run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionStats {
    /// Lines routed to a per-user file.
    pub written: u64,
    /// Lines skipped: malformed JSON or missing `user_id`.
    pub skipped: u64,
}

impl PartitionStats {
    fn absorb(&mut self, other: Self) {
        self.written += other.written;
        self.skipped += other.skipped;
    }
}

/// Split the input corpus into per-user JSONL files.
///
/// Lines are copied verbatim, so re-partitioning unchanged input appends
/// duplicates; resumable runs use the offset checkpoint to avoid that.
pub fn partition_by_user(
    driver: &BatchDriver,
    config: &PartitionConfig,
) -> Result<(PartitionStats, DriverReport), PartitionError> {
    std::fs::create_dir_all(&config.out_dir)?;

    let mut input = BufReader::new(std::fs::File::open(&config.input)?);
    let mut start_offset = 0u64;

    if let Some(marker) = &config.checkpoint {
        if config.discipline == HandleDiscipline::PerWorker {
            warn!("offset checkpointing requires the global handle discipline; disabled");
        } else if let Some(offset) = OffsetCheckpoint::load(marker) {
            input.seek(SeekFrom::Start(offset))?;
            start_offset = offset;
            info!(offset, "resuming partition from checkpoint");
        }
    }

    let lines = LineOffsets::new(input, start_offset);

    let outcome = match config.discipline {
        HandleDiscipline::GlobalLocked => partition_global(driver, config, lines),
        HandleDiscipline::PerWorker => partition_sharded(driver, config, lines),
    }?;

    let (stats, report) = &outcome;
    info!(
        written = stats.written,
        skipped = stats.skipped,
        batches = report.batches,
        failed = report.failures.len(),
        "partition run complete"
    );
    Ok(outcome)
}

/// All workers share one locked cache; a single handle per user id
/// system-wide.
fn partition_global(
    driver: &BatchDriver,
    config: &PartitionConfig,
    lines: LineOffsets,
) -> Result<(PartitionStats, DriverReport), PartitionError> {
    let cache = Arc::new(FileHandleCache::new(&config.out_dir, config.max_open)?);
    let checkpoint = config.checkpoint.clone();

    let worker_cache = Arc::clone(&cache);
    let worker = move |_seq: usize, batch: Vec<std::io::Result<(String, u64)>>| {
        let mut stats = PartitionStats::default();
        let mut end_offset = 0u64;
        for item in batch {
            let (line, offset) = item.map_err(|e| e.to_string())?;
            end_offset = offset;
            match route_line(&worker_cache, &line) {
                Ok(true) => stats.written += 1,
                Ok(false) => stats.skipped += 1,
                Err(e) => return Err(e.to_string()),
            }
        }
        Ok::<_, String>((stats, end_offset))
    };

    // Advance the checkpoint only over a contiguous prefix of completed
    // batches, and only after flushing buffered writes
    let mut totals = PartitionStats::default();
    let mut done: BTreeMap<usize, u64> = BTreeMap::new();
    let mut watermark = 0usize;
    let mut watermark_offset: Option<u64> = None;

    let sink_cache = Arc::clone(&cache);
    let report = driver.run(lines, worker, |seq, (stats, end_offset)| {
        totals.absorb(stats);
        done.insert(seq, end_offset);

        let mut advanced = false;
        while let Some(offset) = done.remove(&watermark) {
            watermark_offset = Some(offset);
            watermark += 1;
            advanced = true;
        }

        if advanced && watermark % CHECKPOINT_INTERVAL == 0 {
            if let (Some(marker), Some(offset)) = (&checkpoint, watermark_offset) {
                sink_cache.flush_all()?;
                OffsetCheckpoint::store(marker, offset)?;
            }
        }
        Ok(())
    })?;

    cache.close_all()?;
    if let (Some(marker), Some(offset)) = (&config.checkpoint, watermark_offset) {
        OffsetCheckpoint::store(marker, offset)?;
    }

    Ok((totals, report))
}

/// Each batch writes its own partial directory through a private cache;
/// partials are merged into the destination in submission order.
fn partition_sharded(
    driver: &BatchDriver,
    config: &PartitionConfig,
    lines: LineOffsets,
) -> Result<(PartitionStats, DriverReport), PartitionError> {
    let partials_root = config.out_dir.join(".partials");
    std::fs::create_dir_all(&partials_root)?;

    let max_open = config.max_open;
    let partials_root_ref = &partials_root;
    let worker = move |seq: usize, batch: Vec<std::io::Result<(String, u64)>>| {
        let dir = partials_root_ref.join(seq.to_string());
        let cache = FileHandleCache::new(&dir, max_open).map_err(|e| e.to_string())?;

        let mut stats = PartitionStats::default();
        for item in batch {
            let (line, _) = item.map_err(|e| e.to_string())?;
            match route_line(&cache, &line) {
                Ok(true) => stats.written += 1,
                Ok(false) => stats.skipped += 1,
                Err(e) => return Err(e.to_string()),
            }
        }
        cache.close_all().map_err(|e| e.to_string())?;
        Ok::<_, String>((stats, dir))
    };

    let (parts, report) = driver.run_collect(lines, worker)?;

    // Merge partials in submission order through a bounded cache of final
    // handles, then drop the partial tree
    let merge_cache = FileHandleCache::new(&config.out_dir, config.max_open)?;
    let mut totals = PartitionStats::default();

    for (stats, dir) in parts {
        totals.absorb(stats);
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<_>>()?;
        entries.sort();

        for path in entries {
            let Some(key) = user_key_from_path(&path) else {
                continue;
            };
            let content = std::fs::read_to_string(&path)?;
            let handle = merge_cache.acquire(key)?;
            handle.lock().write_all(content.as_bytes())?;
        }
        std::fs::remove_dir_all(&dir)?;
    }

    merge_cache.close_all()?;
    let _ = std::fs::remove_dir(&partials_root);
    Ok((totals, report))
}

/// Route one raw corpus line to its user file. Returns `Ok(false)` for
/// lines without a usable `user_id`.
fn route_line(cache: &FileHandleCache, line: &str) -> Result<bool, HandleError> {
    if line.trim().is_empty() {
        return Ok(false);
    }
    let Ok(record) = serde_json::from_str::<PostRecord>(line) else {
        return Ok(false);
    };
    let Some(user_id) = record.user_id else {
        return Ok(false);
    };
    cache.write_line(user_id, line)?;
    Ok(true)
}

fn user_key_from_path(path: &Path) -> Option<u64> {
    path.file_stem()?.to_str()?.parse().ok()
}

/// Streaming line iterator that reports the byte offset just past each
/// yielded line.
struct LineOffsets {
    reader: BufReader<std::fs::File>,
    offset: u64,
    failed: bool,
}

impl LineOffsets {
    fn new(reader: BufReader<std::fs::File>, offset: u64) -> Self {
        Self {
            reader,
            offset,
            failed: false,
        }
    }
}

impl Iterator for LineOffsets {
    type Item = std::io::Result<(String, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(n) => {
                self.offset += n as u64;
                Some(Ok((line, self.offset)))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
