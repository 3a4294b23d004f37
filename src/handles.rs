//! Bounded LRU cache of append-mode file handles.
//!
//! Partitioning a corpus by entity id wants one open file per id, but
//! distinct ids far exceed the file-descriptor limit. The cache keeps at
//! most `max_open` handles alive, evicting the least-recently-used one
//! (flushing and closing it) when the bound is hit. Touching a key
//! refreshes its recency.
//!
//! One type serves both concurrency disciplines: share a single instance
//! behind `Arc` for the global-locked discipline, or give each worker its
//! own instance (over its own partial directory) for the sharded
//! discipline. The cache lock covers only cache mutation; writes lock the
//! individual handle, so unrelated writes are not serialized.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

/// Shared append handle: the buffered writer closes (and flushes) once the
/// cache and any in-flight writer drop their references.
pub type SharedHandle = Arc<Mutex<BufWriter<File>>>;

/// How file-handle caches are shared between workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandleDiscipline {
    /// One cache shared by all workers under a lock. At most one handle per
    /// key system-wide; the default.
    #[default]
    GlobalLocked,
    /// One cache per worker, each writing its own partial directory.
    /// Requires a downstream merge of the partials.
    PerWorker,
}

impl std::str::FromStr for HandleDiscipline {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "global" | "global_locked" => Ok(Self::GlobalLocked),
            "per_worker" | "sharded" => Ok(Self::PerWorker),
            other => Err(format!("unknown handle discipline: {other}")),
        }
    }
}

/// Errors from the handle cache.
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    /// `max_open` of zero can never make progress; rejected before work
    /// begins.
    #[error("handle cache capacity must be non-zero")]
    ZeroCapacity,
    /// Underlying file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<HandleError> for std::io::Error {
    fn from(e: HandleError) -> Self {
        match e {
            HandleError::Io(io) => io,
            other => std::io::Error::new(std::io::ErrorKind::InvalidInput, other.to_string()),
        }
    }
}

/// Bounded cache of append-mode file handles, keyed by entity id.
///
/// Files live under a single destination directory as `<key>.jsonl`.
/// [`close_all`](Self::close_all) must run at shutdown; handles are not
/// implicitly flushed on process exit.
pub struct FileHandleCache {
    dir: PathBuf,
    handles: Mutex<LruCache<u64, SharedHandle>>,
}

impl FileHandleCache {
    /// Create a cache writing under `dir`, holding at most `max_open`
    /// handles. Creates the directory if needed.
    pub fn new(dir: impl AsRef<Path>, max_open: usize) -> Result<Self, HandleError> {
        let capacity = NonZeroUsize::new(max_open).ok_or(HandleError::ZeroCapacity)?;
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            handles: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Directory this cache writes under.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of currently open handles.
    pub fn open_handles(&self) -> usize {
        self.handles.lock().len()
    }

    /// True when `key` currently has an open handle. Does not touch
    /// recency.
    pub fn is_open(&self, key: u64) -> bool {
        self.handles.lock().contains(&key)
    }

    /// Return the append handle for `key`, opening it on first use and
    /// evicting the least-recently-used handle if the bound is exceeded.
    pub fn acquire(&self, key: u64) -> Result<SharedHandle, HandleError> {
        let mut handles = self.handles.lock();

        if let Some(handle) = handles.get(&key) {
            return Ok(Arc::clone(handle));
        }

        let path = self.dir.join(format!("{key}.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let handle: SharedHandle = Arc::new(Mutex::new(BufWriter::new(file)));

        if let Some((_, evicted)) = handles.push(key, Arc::clone(&handle)) {
            // Capacity hit: flush the evicted handle; the file closes once
            // the last reference drops
            evicted.lock().flush()?;
        }

        Ok(handle)
    }

    /// Append one line to the file for `key`. A trailing newline is added
    /// when missing.
    pub fn write_line(&self, key: u64, line: &str) -> Result<(), HandleError> {
        let handle = self.acquire(key)?;
        let mut writer = handle.lock();
        writer.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Flush every open handle without closing it.
    pub fn flush_all(&self) -> Result<(), HandleError> {
        let handles = self.handles.lock();
        for (_, handle) in handles.iter() {
            handle.lock().flush()?;
        }
        Ok(())
    }

    /// Flush and close every remaining handle.
    pub fn close_all(&self) -> Result<(), HandleError> {
        let mut handles = self.handles.lock();
        while let Some((_, handle)) = handles.pop_lru() {
            handle.lock().flush()?;
        }
        Ok(())
    }
}
