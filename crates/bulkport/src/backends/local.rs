//! 📂 Previously, on "Things That Could Go Wrong With A File"...
//!
//! The upload landed in the uploads folder. Someone exported it from a
//! spreadsheet, so it may or may not end with a newline (or three). We count the lines
//! once (memchr, because scanning for `\n` one byte at a time is a 1995 move),
//! then reopen the file and hand the stream to the CSV parser.

use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{self, AsyncReadExt};
use tracing::{debug, warn};

use crate::backends::{CsvReader, RowSource};

// 📏 64 KiB per read while counting. The page cache does the heavy lifting anyway.
const COUNT_CHUNK_BYTES: usize = 64 * 1024;

/// 🧮 Running line tally over a byte stream fed in chunks.
///
/// Matches the CSV parser, which skips blank lines: only lines holding
/// something other than `\r` count, and a final non-blank run without a
/// trailing `\n` is one more line. An empty input has zero lines.
#[derive(Debug, Default)]
pub(crate) struct LineTally {
    lines: u64,
    open_line_has_content: bool,
}

impl LineTally {
    pub(crate) fn feed(&mut self, chunk: &[u8]) {
        let mut the_start = 0;
        for newline in memchr::memchr_iter(b'\n', chunk) {
            self.note(&chunk[the_start..newline]);
            if self.open_line_has_content {
                self.lines += 1;
            }
            self.open_line_has_content = false;
            the_start = newline + 1;
        }
        self.note(&chunk[the_start..]);
    }

    fn note(&mut self, bytes: &[u8]) {
        if !self.open_line_has_content {
            self.open_line_has_content = bytes.iter().any(|&b| b != b'\r');
        }
    }

    pub(crate) fn lines(&self) -> u64 {
        self.lines + u64::from(self.open_line_has_content)
    }

    /// Data rows: every line except the header.
    pub(crate) fn data_rows(&self) -> u64 {
        self.lines().saturating_sub(1)
    }
}

/// 📂 LocalFileSource: a CSV sitting at `<uploads_folder>/<file_name>`.
#[derive(Debug, Clone)]
pub struct LocalFileSource {
    path: PathBuf,
}

impl LocalFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn open_file(&self) -> Result<File> {
        File::open(&self.path).await.context(format!(
            "💀 The door to '{}' would not budge. We knocked. We checked if it existed \
             (it might not). We checked permissions (they might be wrong). The upload remains unread.",
            self.path.display()
        ))
    }
}

#[async_trait]
impl RowSource for LocalFileSource {
    async fn count_rows(&self) -> Result<u64> {
        let mut the_file = self.open_file().await?;
        let mut the_buf = vec![0u8; COUNT_CHUNK_BYTES];
        let mut the_tally = LineTally::default();

        loop {
            let bytes_read = the_file
                .read(&mut the_buf)
                .await
                .with_context(|| format!("💀 Read failed mid-count on '{}'", self.path.display()))?;
            if bytes_read == 0 {
                break;
            }
            the_tally.feed(&the_buf[..bytes_read]);
        }

        debug!(
            "📖 counted {} lines in '{}' like a very diligent intern",
            the_tally.lines(),
            self.path.display()
        );
        Ok(the_tally.data_rows())
    }

    async fn open(&self) -> Result<CsvReader> {
        let the_file = self.open_file().await?;
        Ok(Box::new(io::BufReader::new(the_file)))
    }

    async fn delete_source(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("🗑️ removed finished upload '{}'", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(
                    "⚠️ upload '{}' was already gone when we came to delete it",
                    self.path.display()
                );
                Ok(())
            }
            Err(e) => Err(e).with_context(|| {
                format!("💀 Could not delete finished upload '{}'", self.path.display())
            }),
        }
    }

    fn label(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally_of(chunks: &[&[u8]]) -> LineTally {
        let mut the_tally = LineTally::default();
        for chunk in chunks {
            the_tally.feed(chunk);
        }
        the_tally
    }

    #[test]
    fn the_one_where_a_missing_trailing_newline_still_counts() {
        assert_eq!(tally_of(&[b"h\na\nb"]).lines(), 3);
        assert_eq!(tally_of(&[b"h\na\nb\n"]).lines(), 3);
        assert_eq!(tally_of(&[b""]).lines(), 0);
        assert_eq!(tally_of(&[]).data_rows(), 0);
    }

    #[test]
    fn the_one_where_blank_lines_are_not_rows() {
        assert_eq!(tally_of(&[b"h\na\nb\n\n"]).data_rows(), 2);
        assert_eq!(tally_of(&[b"h\r\n\r\na\r\n", b"\r\nb\r\n\r\n"]).data_rows(), 2);
        assert_eq!(tally_of(&[b"h\n\n\n"]).data_rows(), 0);
        assert_eq!(tally_of(&[b"\n\n"]).lines(), 0);
    }

    #[test]
    fn the_one_where_chunk_boundaries_do_not_matter() {
        let the_tally = tally_of(&[b"header\nro", b"w1\n", b"", b"row2"]);
        assert_eq!(the_tally.lines(), 3);
        assert_eq!(the_tally.data_rows(), 2);
    }

    #[tokio::test]
    async fn the_one_where_header_plus_ten_rows_is_ten() {
        let the_dir = tempfile::tempdir().unwrap();
        let the_path = the_dir.path().join("ten.csv");
        let mut the_csv = String::from("code,primaryEmail,primaryPhone\n");
        for i in 0..10 {
            the_csv.push_str(&format!("C{i},user{i}@example.com,555-000{i}\n"));
        }
        std::fs::write(&the_path, the_csv).unwrap();

        let the_source = LocalFileSource::new(&the_path);

        assert_eq!(the_source.count_rows().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn the_one_where_deleting_twice_is_not_a_crime() {
        let the_dir = tempfile::tempdir().unwrap();
        let the_path = the_dir.path().join("gone.csv");
        std::fs::write(&the_path, "code\n").unwrap();
        let the_source = LocalFileSource::new(&the_path);

        the_source.delete_source().await.unwrap();
        assert!(!the_path.exists());
        the_source.delete_source().await.unwrap();
    }

    #[tokio::test]
    async fn the_one_where_a_missing_file_fails_loudly() {
        let the_source = LocalFileSource::new("/definitely/not/here.csv");
        assert!(the_source.count_rows().await.is_err());
        assert!(the_source.open().await.is_err());
    }
}
