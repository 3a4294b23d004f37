//! Streaming reader over a newline-delimited JSON post corpus.
//!
//! Corpora are far larger than memory, so every consumer works line by line.
//! Malformed lines (bad JSON, missing `post_id`) are skipped and counted,
//! never fatal; I/O errors propagate to the caller.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::types::PostRecord;

/// Streaming iterator over post records in a JSONL file.
///
/// Yields `Ok(PostRecord)` per valid line. Parse failures are skipped and
/// tallied in [`skipped`](Self::skipped); only I/O errors surface as `Err`.
pub struct CorpusReader {
    path: PathBuf,
    reader: BufReader<File>,
    line: String,
    line_no: u64,
    skipped: u64,
}

impl CorpusReader {
    /// Open a corpus file for streaming.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            path,
            reader: BufReader::new(file),
            line: String::new(),
            line_no: 0,
            skipped: 0,
        })
    }

    /// Number of malformed lines skipped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Number of lines consumed so far, valid or not.
    pub fn lines_read(&self) -> u64 {
        self.line_no
    }

    /// Path this reader was opened on.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for CorpusReader {
    type Item = std::io::Result<PostRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e)),
            }
            self.line_no += 1;

            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<PostRecord>(trimmed) {
                Ok(record) => return Some(Ok(record)),
                Err(e) => {
                    self.skipped += 1;
                    warn!(
                        path = %self.path.display(),
                        line = self.line_no,
                        error = %e,
                        "skipped malformed corpus line"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PostId;
    use std::io::Write;

    fn write_corpus(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_reads_valid_records() {
        let file = write_corpus(&[
            r#"{"post_id": 1}"#,
            r#"{"post_id": 2, "reply_to": 1}"#,
        ]);

        let mut reader = CorpusReader::open(file.path()).unwrap();
        let records: Vec<_> = reader.by_ref().map(|r| r.unwrap()).collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].reply_to, Some(PostId::new(1)));
        assert_eq!(reader.skipped(), 0);
    }

    #[test]
    fn test_skips_and_counts_malformed_lines() {
        let file = write_corpus(&[
            r#"{"post_id": 1}"#,
            "not json at all",
            r#"{"user_id": 9}"#,
            "",
            r#"{"post_id": 2}"#,
        ]);

        let mut reader = CorpusReader::open(file.path()).unwrap();
        let records: Vec<_> = reader.by_ref().map(|r| r.unwrap()).collect();

        assert_eq!(records.len(), 2);
        // Blank lines are neither records nor failures
        assert_eq!(reader.skipped(), 2);
    }

    #[test]
    fn test_open_missing_file_errors() {
        assert!(CorpusReader::open("/nonexistent/corpus.jsonl").is_err());
    }
}
