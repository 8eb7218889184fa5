//! 🎬 *[a CSV flows in. batches of 500 flow out. one at a time. always one at a time.]*
//!
//! 📄 The Batch Streamer: parses the byte stream as CSV (first row = header),
//! packs rows into batches of at most `bulk_limit`, and feeds each batch to a
//! [`BatchHandler`] with the source's row total.
//!
//! 🧠 Knowledge graph:
//! - Two halves, same shape as a source worker / sink worker pair:
//!   the **reader task** parses and packs, the **handler loop** validates and dispatches.
//! - Between them: a bounded `async_channel`. When it is full the reader parks
//!   on `send`, and that's the back-pressure. The handler loop awaits each batch to
//!   completion before receiving the next, so at most ONE batch is ever in the
//!   handler. The validation cache depends on that.
//! - End of stream: the leftover partial batch (even an empty one) goes through
//!   the same handler, then we report success.
//! - Parse error or handler error: everything stops. No partial-success encore.
//!
//! ⚠️ The handler loop owning the receiver means a handler failure drops it,
//! which makes the reader's next `send` fail, which ends the reader. Tidy.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use csv_async::{AsyncReaderBuilder, StringRecord};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::backends::{CsvReader, OpenedSource};
use crate::common::{RawRow, RowBatch};
use crate::progress::ImportProgress;

/// 🎯 Whoever processes batches. Called strictly one batch at a time.
#[async_trait]
pub trait BatchHandler: Send {
    async fn handle_batch(&mut self, batch: RowBatch, total_rows: u64) -> Result<()>;
}

/// 📊 What a finished stream looked like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamSummary {
    /// Handler invocations, including the final flush.
    pub batches: usize,
    pub rows: u64,
}

/// 📄 Streams one opened source into a handler.
#[derive(Debug, Clone)]
pub struct BatchStreamer {
    bulk_limit: usize,
    queue_capacity: usize,
    show_progress: bool,
}

impl BatchStreamer {
    pub fn new(bulk_limit: usize, queue_capacity: usize) -> Self {
        Self {
            // 🔒 zero would mean "never full" and bounded(0) panics. one is the floor.
            bulk_limit: bulk_limit.max(1),
            queue_capacity: queue_capacity.max(1),
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// 🚀 Run the stream to the end (or to the first error).
    pub async fn run<H: BatchHandler>(
        &self,
        source_label: String,
        opened: OpenedSource,
        handler: &mut H,
    ) -> Result<StreamSummary> {
        let OpenedSource { reader, total_rows } = opened;
        let (tx, rx) = async_channel::bounded::<RowBatch>(self.queue_capacity);
        let the_reader_task = ReaderTask::new(reader, tx, self.bulk_limit).start();

        let mut the_progress = ImportProgress::new(source_label, total_rows, self.show_progress);
        let the_outcome = drain_batches(rx, handler, total_rows, &mut the_progress).await;

        match the_outcome {
            Ok(summary) => {
                // 🏁 the channel closed cleanly; did the reader close it happily or in tears?
                the_reader_task
                    .await
                    .context("💀 CSV reader task panicked or was aborted")??;
                the_progress.finish();
                debug!(
                    "✅ stream finished: {} rows in {} batches",
                    summary.rows, summary.batches
                );
                Ok(summary)
            }
            Err(e) => {
                // 🛑 handler failed: the receiver is gone, the reader will trip on its next send
                the_reader_task.abort();
                Err(e)
            }
        }
    }
}

async fn drain_batches<H: BatchHandler>(
    rx: Receiver<RowBatch>,
    handler: &mut H,
    total_rows: u64,
    progress: &mut ImportProgress,
) -> Result<StreamSummary> {
    let mut the_summary = StreamSummary::default();
    while let Ok(batch) = rx.recv().await {
        let the_len = batch.len() as u64;
        trace!("🪣 handing a batch of {} rows to the handler", the_len);
        handler.handle_batch(batch, total_rows).await?;
        the_summary.batches += 1;
        the_summary.rows += the_len;
        progress.update(the_len);
    }
    Ok(the_summary)
}

/// 📖 Parses CSV records and packs them into batches. Lives in its own task.
struct ReaderTask {
    reader: CsvReader,
    tx: Sender<RowBatch>,
    bulk_limit: usize,
}

impl ReaderTask {
    fn new(reader: CsvReader, tx: Sender<RowBatch>, bulk_limit: usize) -> Self {
        Self {
            reader,
            tx,
            bulk_limit,
        }
    }

    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            let ReaderTask {
                reader,
                tx,
                bulk_limit,
            } = self;

            let mut the_csv = AsyncReaderBuilder::new()
                .has_headers(true)
                .create_reader(reader);

            let the_headers: Arc<[String]> = the_csv
                .headers()
                .await
                .context("💀 Could not read the CSV header row")?
                .iter()
                .map(str::to_string)
                .collect::<Vec<_>>()
                .into();

            let mut the_batch = RowBatch::with_capacity(bulk_limit);
            let mut the_record = StringRecord::new();
            let mut the_line = 1u64;

            loop {
                let has_more = the_csv.read_record(&mut the_record).await.with_context(|| {
                    format!("💀 CSV parse failed after line {the_line}")
                })?;
                if !has_more {
                    break;
                }
                the_line += 1;

                let the_values = the_record.iter().map(str::to_string).collect();
                the_batch.rows.push(RawRow::new(Arc::clone(&the_headers), the_values));

                if the_batch.len() >= bulk_limit {
                    let the_full = std::mem::replace(&mut the_batch, RowBatch::with_capacity(bulk_limit));
                    if tx.send(the_full).await.is_err() {
                        warn!("⚠️ batch handler hung up, CSV reader standing down");
                        return Ok(());
                    }
                }
            }

            // 🧹 final flush, even when empty: the handler learns the stream is over
            if tx.send(the_batch).await.is_err() {
                warn!("⚠️ batch handler hung up before the final flush");
            }
            Ok(())
        })
    }
}
