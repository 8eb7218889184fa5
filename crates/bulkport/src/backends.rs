//! 🔌 Backends: where the CSV bytes come from.
//!
//! 🚰 A source hands out two things: a readable byte stream of the CSV payload,
//! and the number of data rows in it (header excluded), counted BEFORE the first
//! row is streamed so the percentage math is right from batch one.
//!
//! 🧠 Knowledge graph:
//! - Pattern: trait → concrete impls (LocalFileSource, S3Source, InMemorySource) → SourceBackend enum
//! - Source → CsvReader → BatchStreamer (parses) → BatchHandler (validates + dispatches)
//! - Sources do NOT parse. They are faucets, not chefs.
//!
//! 🦆 The duck is here because every module gets one. This is law.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncRead;
use tracing::debug;

use crate::app_config::AppConfig;
use crate::common::UploadType;

pub(crate) mod in_mem;
pub(crate) mod local;
pub(crate) mod s3;

pub use in_mem::InMemorySource;
pub use local::LocalFileSource;
pub use s3::{S3Config, S3Source};

// 🧠 Boxed because every origin story returns a different concrete reader type.
// One vtable hop per read. The disk (or S3) laughs at this cost.
pub type CsvReader = Box<dyn AsyncRead + Send + Unpin>;

/// 📦 What the streamer gets: bytes to parse plus the row total to report against.
pub struct OpenedSource {
    pub reader: CsvReader,
    pub total_rows: u64,
}

impl std::fmt::Debug for OpenedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedSource")
            .field("total_rows", &self.total_rows)
            .finish()
    }
}

/// 🚰 A place a CSV upload can live.
///
/// # Contract 📜
/// - `count_rows` returns data rows only. The header is not a customer.
/// - `open` returns a fresh stream positioned at the first byte (header included).
/// - `delete_source` removes the upload once the import is Done. Missing is fine.
#[async_trait]
pub trait RowSource: std::fmt::Debug + Send + Sync {
    async fn count_rows(&self) -> Result<u64>;
    async fn open(&self) -> Result<CsvReader>;
    async fn delete_source(&self) -> Result<()>;
    /// 🏷️ Human readable origin, shows up in logs and the progress bar.
    fn label(&self) -> String;

    /// 📏 Count first, then open. The order is the whole point.
    async fn open_counted(&self) -> Result<OpenedSource> {
        let total_rows = self
            .count_rows()
            .await
            .with_context(|| format!("💀 Could not count rows of {}", self.label()))?;
        debug!("📏 {} holds {} data rows", self.label(), total_rows);
        let reader = self
            .open()
            .await
            .with_context(|| format!("💀 Could not open {}", self.label()))?;
        Ok(OpenedSource { reader, total_rows })
    }
}

/// 🎭 The many faces of a source. The orchestrator never needs to know which one it got.
#[derive(Debug)]
pub enum SourceBackend {
    Local(LocalFileSource),
    S3(S3Source),
    InMemory(InMemorySource),
}

#[async_trait]
impl RowSource for SourceBackend {
    async fn count_rows(&self) -> Result<u64> {
        match self {
            SourceBackend::Local(s) => s.count_rows().await,
            SourceBackend::S3(s) => s.count_rows().await,
            SourceBackend::InMemory(s) => s.count_rows().await,
        }
    }

    async fn open(&self) -> Result<CsvReader> {
        match self {
            SourceBackend::Local(s) => s.open().await,
            SourceBackend::S3(s) => s.open().await,
            SourceBackend::InMemory(s) => s.open().await,
        }
    }

    async fn delete_source(&self) -> Result<()> {
        match self {
            SourceBackend::Local(s) => s.delete_source().await,
            SourceBackend::S3(s) => s.delete_source().await,
            SourceBackend::InMemory(s) => s.delete_source().await,
        }
    }

    fn label(&self) -> String {
        match self {
            SourceBackend::Local(s) => s.label(),
            SourceBackend::S3(s) => s.label(),
            SourceBackend::InMemory(s) => s.label(),
        }
    }
}

/// 🎯 Resolve an upload to its backend: `<uploads_folder>/<file_name>` locally,
/// or `s3://<storage.bucket>/<file_name>` for AWS uploads.
pub async fn source_for(
    app_config: &AppConfig,
    file_name: &str,
    upload_type: UploadType,
) -> Result<SourceBackend> {
    match upload_type {
        UploadType::Local => {
            let the_path = Path::new(&app_config.import.uploads_folder).join(file_name);
            Ok(SourceBackend::Local(LocalFileSource::new(the_path)))
        }
        UploadType::Aws => {
            let storage = app_config.storage.clone().context(
                "💀 An AWS upload arrived but no [storage] bucket is configured (AWS_BUCKET). \
                 We have a key and nowhere to put it.",
            )?;
            Ok(SourceBackend::S3(S3Source::new(storage, file_name.to_string()).await?))
        }
    }
}
