//! # Previously, on bulkport...
//!
//! 🎬 The test suite needed a CSV. It did not want a disk. It did not want a
//! bucket. It wanted a string, held gently in RAM, gone the moment you blink.
//!
//! [`InMemorySource`] is that string. It counts its lines the same way the
//! local file source does, so tests see the exact same totals.
//!
//! ⚠️ This is for tests and demos. If you're deploying this to prod, please
//! also deploy a therapist.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;

use crate::backends::local::LineTally;
use crate::backends::{CsvReader, RowSource};

/// 📦 A CSV upload that lives entirely in memory.
#[derive(Debug, Clone)]
pub struct InMemorySource {
    label: String,
    contents: Arc<str>,
    // 🗑️ shared so a test can keep a clone and check the upload got "deleted"
    deleted: Arc<AtomicBool>,
}

impl InMemorySource {
    pub fn new(label: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            contents: Arc::from(contents.into()),
            deleted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RowSource for InMemorySource {
    async fn count_rows(&self) -> Result<u64> {
        let mut the_tally = LineTally::default();
        the_tally.feed(self.contents.as_bytes());
        Ok(the_tally.data_rows())
    }

    async fn open(&self) -> Result<CsvReader> {
        if self.is_deleted() {
            anyhow::bail!("💀 '{}' was deleted, there is nothing left to read", self.label);
        }
        let the_bytes = self.contents.as_bytes().to_vec();
        Ok(Box::new(std::io::Cursor::new(the_bytes)))
    }

    async fn delete_source(&self) -> Result<()> {
        self.deleted.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn label(&self) -> String {
        format!("mem://{}", self.label)
    }
}
