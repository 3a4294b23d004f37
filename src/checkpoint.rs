//! Durable artifact and progress-marker primitives.
//!
//! Every artifact the pipeline writes goes through atomic replace: content is
//! written to a sibling temp file, flushed and synced, then renamed over the
//! destination. A reader therefore never observes a half-written artifact,
//! and a killed run leaves either the old state or the new one, nothing in
//! between.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;
use xxhash_rust::xxh64::Xxh64;

use crate::types::{PostId, WalkRecord};

/// Writer that commits its content atomically via temp file + rename.
///
/// Dropping without [`commit`](Self::commit) discards the temp file, so an
/// aborted write never clobbers the previous artifact.
pub struct AtomicFile {
    dest: PathBuf,
    tmp: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl AtomicFile {
    /// Begin writing the artifact destined for `dest`.
    pub fn create(dest: impl AsRef<Path>) -> std::io::Result<Self> {
        let dest = dest.as_ref().to_path_buf();
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut tmp = dest.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let file = File::create(&tmp)?;
        Ok(Self {
            dest,
            tmp,
            writer: Some(BufWriter::new(file)),
        })
    }

    /// Flush, sync, and rename the temp file over the destination.
    pub fn commit(mut self) -> std::io::Result<()> {
        let mut writer = self.writer.take().expect("commit called once");
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);
        std::fs::rename(&self.tmp, &self.dest)
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer
            .as_mut()
            .expect("write after commit")
            .write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.as_mut().expect("flush after commit").flush()
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            // Uncommitted: discard the partial temp file, keep the old artifact
            let _ = std::fs::remove_file(&self.tmp);
        }
    }
}

/// Content fingerprint of a file (streamed xxh64, hex-encoded).
///
/// Used to tie derived artifacts to the exact input they were built from,
/// so a stale snapshot is detected instead of silently reused.
pub fn file_fingerprint(path: impl AsRef<Path>) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Xxh64::new(0);
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:016x}", hasher.digest()))
}

/// Byte-offset progress marker for streaming input consumption.
///
/// Stored as a single JSON object and replaced atomically, so the marker is
/// always either absent, the previous offset, or the new offset. The offset
/// must only be advanced past input whose output has been durably flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetCheckpoint {
    /// Byte offset into the input up to which all work is complete.
    pub offset: u64,
}

impl OffsetCheckpoint {
    /// Load a previously stored offset, `None` if no marker exists or the
    /// marker is unreadable (a corrupt marker restarts from zero rather
    /// than failing the run).
    pub fn load(path: impl AsRef<Path>) -> Option<u64> {
        let path = path.as_ref();
        let file = File::open(path).ok()?;
        match serde_json::from_reader::<_, Self>(BufReader::new(file)) {
            Ok(cp) => Some(cp.offset),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable offset checkpoint");
                None
            }
        }
    }

    /// Atomically store the given offset.
    pub fn store(path: impl AsRef<Path>, offset: u64) -> std::io::Result<()> {
        let mut file = AtomicFile::create(path)?;
        serde_json::to_writer(&mut file, &Self { offset })?;
        file.commit()
    }
}

/// Reload the set of roots that already have a walk record.
///
/// The aggregated walks file doubles as the progress marker for the walk
/// stage: record identity is `start_node`, so a resumed run skips these
/// roots instead of reprocessing them. Unparseable lines (for example a
/// trailing partial line from a killed append) are skipped.
pub fn load_processed_roots(walks_path: impl AsRef<Path>) -> std::io::Result<HashSet<PostId>> {
    let walks_path = walks_path.as_ref();
    let mut processed = HashSet::new();

    if !walks_path.exists() {
        return Ok(processed);
    }

    let reader = BufReader::new(File::open(walks_path)?);
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WalkRecord>(&line) {
            Ok(record) => {
                processed.insert(record.start_node);
            }
            Err(e) => {
                warn!(
                    path = %walks_path.display(),
                    error = %e,
                    "skipped unreadable walk record while resuming"
                );
            }
        }
    }

    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_atomic_commit_replaces_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("artifact.jsonl");
        std::fs::write(&dest, "old\n").unwrap();

        let mut file = AtomicFile::create(&dest).unwrap();
        writeln!(file, "new").unwrap();
        file.commit().unwrap();

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "new\n");
        assert!(!dir.path().join("artifact.jsonl.tmp").exists());
    }

    #[test]
    fn test_uncommitted_write_preserves_old_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("artifact.jsonl");
        std::fs::write(&dest, "old\n").unwrap();

        {
            let mut file = AtomicFile::create(&dest).unwrap();
            writeln!(file, "partial").unwrap();
            // dropped without commit
        }

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "old\n");
        assert!(!dir.path().join("artifact.jsonl.tmp").exists());
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");

        std::fs::write(&a, "same content").unwrap();
        std::fs::write(&b, "same content").unwrap();
        assert_eq!(
            file_fingerprint(&a).unwrap(),
            file_fingerprint(&b).unwrap()
        );

        std::fs::write(&b, "different").unwrap();
        assert_ne!(
            file_fingerprint(&a).unwrap(),
            file_fingerprint(&b).unwrap()
        );
    }

    #[test]
    fn test_offset_checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("progress.json");

        assert_eq!(OffsetCheckpoint::load(&marker), None);
        OffsetCheckpoint::store(&marker, 4096).unwrap();
        assert_eq!(OffsetCheckpoint::load(&marker), Some(4096));

        // Corrupt marker restarts from scratch instead of failing
        std::fs::write(&marker, "{truncated").unwrap();
        assert_eq!(OffsetCheckpoint::load(&marker), None);
    }

    #[test]
    fn test_processed_roots_reload_skips_partial_line() {
        let dir = tempfile::tempdir().unwrap();
        let walks = dir.path().join("walks.jsonl");
        std::fs::write(
            &walks,
            concat!(
                r#"{"start_node":1,"walk_length":1,"walk_depth":0,"walk_path":{"0":[1]}}"#,
                "\n",
                r#"{"start_node":2,"walk_len"#,
            ),
        )
        .unwrap();

        let processed = load_processed_roots(&walks).unwrap();
        assert_eq!(processed.len(), 1);
        assert!(processed.contains(&PostId::new(1)));
    }
}
