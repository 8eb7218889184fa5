//! 🎬 *[INT. OPS ROOM. someone clicks "Import". 40,000 rows of customers start to move.]*
//!
//! 🎼 The Import Orchestrator: the public face of the pipeline. Three requests
//! come in (create, remove, cancel), and each one wires sources, streamer,
//! validation, dispatcher and history together.
//!
//! 🧠 Knowledge graph:
//! - `receive_import_create` does the fast part inline (file type check, source
//!   resolution, history creation, end hook, first snapshot) and hands the slow
//!   part (count, stream, validate, dispatch) to a background task. It returns
//!   the history id right away; `wait_for_import` joins the background task.
//! - The batch handler pins one [`WorkerContext`] for the whole import. Its own
//!   history writes and every worker it spawns go through that context, so a
//!   cancel stops the import at the very next write.
//! - Rejected rows are recorded BEFORE the batch's worker runs. The end hook
//!   fires when that worker finishes and can already see `success + failed`.
//! - A batch with no valid rows dispatches nothing, so the end hook never fires
//!   for it. The background task runs the same finalizer once the stream ends.
//! - Remove uses its own scope (`<id>:remove`) so it never replaces the end hook
//!   of an import that is still streaming.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::app_config::AppConfig;
use crate::backends::{RowSource, SourceBackend, source_for};
use crate::common::{
    ContentType, ImportAck, ImportCreateContent, ImportCreated, ImportRemoveContent, ImportUser,
    RowBatch,
};
use crate::dispatcher::{WorkerContext, WorkerDispatcher};
use crate::error::ImportError;
use crate::fields::FieldProperty;
use crate::history::{
    HistoryStore, HistoryUpdate, ImportHistory, ImportStatus, batch_percentage,
};
use crate::store::EntityStore;
use crate::streamer::{BatchHandler, BatchStreamer};
use crate::validation::{EmptyValuePolicy, ValidationSnapshot, before_import, is_row_valid};
use crate::workers::{BulkInsert, ImportHistoryRemove};

const CSV_FILE_TYPE: &str = "csv";

/// 🎼 Runs imports and removals against one entity store and one history store.
#[derive(Debug)]
pub struct Orchestrator {
    app_config: AppConfig,
    store: Arc<dyn EntityStore>,
    history: Arc<dyn HistoryStore>,
    dispatcher: Arc<WorkerDispatcher>,
    running: Mutex<HashMap<String, JoinHandle<Result<()>>>>,
}

impl Orchestrator {
    pub fn new(
        app_config: AppConfig,
        store: Arc<dyn EntityStore>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        let dispatcher = Arc::new(WorkerDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&history),
        ));
        Self {
            app_config,
            store,
            history,
            dispatcher,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn dispatcher(&self) -> &WorkerDispatcher {
        &self.dispatcher
    }

    pub fn history_store(&self) -> &dyn HistoryStore {
        self.history.as_ref()
    }

    fn policy(&self) -> EmptyValuePolicy {
        EmptyValuePolicy::from_flag(self.app_config.import.flag_empty_duplicates)
    }

    /// 📥 Accept an import. Returns the new history id; the rows stream in the background.
    ///
    /// Errors: `FatalInput` for a non-CSV file or an unresolvable upload location.
    pub async fn receive_import_create(&self, content: ImportCreateContent) -> Result<ImportCreated> {
        if content.file_type != CSV_FILE_TYPE {
            warn!("⚠️ rejected import of '{}': file type {}", content.file_name, content.file_type);
            return Err(ImportError::fatal("Invalid file type").into());
        }

        let the_source = source_for(&self.app_config, &content.file_name, content.upload_type)
            .await
            .map_err(|e| ImportError::fatal(format!("{e:#}")))?;
        let the_source = Arc::new(the_source);

        let the_history = self
            .history
            .create(content.content_type, &content.user.id)
            .await
            .context("💀 Could not create the import history")?;
        let the_id = the_history.id.clone();
        info!(
            "📥 import {} accepted: {} from {}",
            the_id,
            content.content_type,
            the_source.label()
        );

        let the_finalizer = Arc::new(ImportFinalizer {
            history: Arc::clone(&self.history),
            source: Arc::clone(&the_source),
            import_history_id: the_id.clone(),
            source_deleted: Mutex::new(false),
        });
        {
            let the_finalizer = Arc::clone(&the_finalizer);
            self.dispatcher
                .set_handle_end(the_id.clone(), move || {
                    let the_finalizer = Arc::clone(&the_finalizer);
                    async move { the_finalizer.check().await }
                })
                .await;
        }

        let the_snapshot =
            match before_import(self.store.as_ref(), content.content_type, self.policy()).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    error!("💀 import {} could not load its first snapshot: {:#}", the_id, e);
                    self.dispatcher.clear_handle_end(&the_id).await;
                    return Err(e);
                }
            };

        let the_handler = ImportBatchHandler {
            ctx: self.dispatcher.context().await,
            dispatcher: Arc::clone(&self.dispatcher),
            store: Arc::clone(&self.store),
            import_history_id: the_id.clone(),
            content_type: content.content_type,
            scope_brand_ids: content.scope_brand_ids,
            user: content.user,
            policy: self.policy(),
            snapshot: the_snapshot,
            total_rows: None,
            properties: None,
            resolved_headers: None,
        };
        let the_streamer = BatchStreamer::new(
            self.app_config.import.bulk_limit,
            self.app_config.runtime.queue_capacity,
        )
        .with_progress(self.app_config.runtime.show_progress);

        let the_task = tokio::spawn(run_import(
            the_streamer,
            the_source,
            the_handler,
            the_finalizer,
            Arc::clone(&self.dispatcher),
        ));
        self.running.lock().await.insert(the_id.clone(), the_task);

        Ok(ImportCreated { id: the_id })
    }

    /// ⏳ Wait for an import's background stream and return its final history.
    ///
    /// Surfaces the `Transport`, `Worker`, `FatalInput` or `Cancelled` error that
    /// ended the stream. Waiting twice (or on an import started elsewhere) just
    /// returns the stored history.
    pub async fn wait_for_import(&self, import_history_id: &str) -> Result<ImportHistory> {
        let the_task = self.running.lock().await.remove(import_history_id);
        if let Some(task) = the_task {
            match task.await {
                Ok(outcome) => outcome?,
                Err(join) if join.is_cancelled() => return Err(ImportError::Cancelled.into()),
                Err(join) => {
                    return Err(ImportError::Worker(format!("import task panicked: {join}")).into());
                }
            }
        }
        self.history.require(import_history_id).await
    }

    /// 🗑️ Remove every record an import created, one bulk-limit chunk per worker.
    ///
    /// Once the last chunk is gone, the history itself is deleted if it was marked Removed.
    /// A history with no records left is checked right away.
    pub async fn receive_import_remove(&self, content: ImportRemoveContent) -> Result<ImportAck> {
        let the_id = content.import_history_id;
        let the_history = self.history.require(&the_id).await?;
        let the_scope = format!("{the_id}:remove");

        let the_cleanup = Arc::new(RemovalCleanup {
            history: Arc::clone(&self.history),
            import_history_id: the_id.clone(),
        });
        {
            let the_cleanup = Arc::clone(&the_cleanup);
            self.dispatcher
                .set_handle_end(the_scope.clone(), move || {
                    let the_cleanup = Arc::clone(&the_cleanup);
                    async move { the_cleanup.check().await }
                })
                .await;
        }

        let the_chunks: Vec<Vec<String>> = the_history
            .ids
            .chunks(self.app_config.import.bulk_limit.max(1))
            .map(<[String]>::to_vec)
            .collect();
        info!(
            "🗑️ removing {} records of import {} in {} chunks",
            the_history.ids.len(),
            the_id,
            the_chunks.len()
        );

        let the_outcome = async {
            if the_chunks.is_empty() {
                // nothing to dispatch, so no worker will trigger the hook
                return the_cleanup.check().await;
            }
            for chunk in the_chunks {
                self.dispatcher
                    .create_worker(
                        &the_scope,
                        ImportHistoryRemove {
                            content_type: content.content_type,
                            import_history_id: the_id.clone(),
                            result: chunk,
                        },
                    )
                    .await?;
            }
            Ok(())
        }
        .await;

        self.dispatcher.clear_handle_end(&the_scope).await;
        if let Err(ref e) = the_outcome {
            error!("💀 Failed to remove import {}: {:#}", the_id, e);
        }
        the_outcome.map(|_| ImportAck::ok())
    }

    /// 🛑 Abort every running worker. History is left exactly as it is.
    pub async fn receive_import_cancel(&self) -> ImportAck {
        let the_removed = self.dispatcher.remove_workers().await;
        info!("🛑 import cancel: {} workers removed", the_removed);
        ImportAck::ok()
    }

    /// 🏷️ Mark an import Removed, ahead of `receive_import_remove`.
    pub async fn mark_removed(&self, import_history_id: &str) -> Result<ImportHistory> {
        self.history
            .update(import_history_id, HistoryUpdate::SetStatus(ImportStatus::Removed))
            .await
    }
}

/// 🏃 The background half of an import.
async fn run_import(
    streamer: BatchStreamer,
    source: Arc<SourceBackend>,
    mut handler: ImportBatchHandler,
    finalizer: Arc<ImportFinalizer>,
    dispatcher: Arc<WorkerDispatcher>,
) -> Result<()> {
    let the_id = handler.import_history_id.clone();

    let the_outcome = async {
        let the_opened = source
            .open_counted()
            .await
            .map_err(|e| anyhow::Error::from(ImportError::transport(&e)))?;
        let the_summary = streamer.run(source.label(), the_opened, &mut handler).await?;
        handler.reconcile_total(the_summary.rows).await?;
        finalizer.check().await
    }
    .await;

    dispatcher.clear_handle_end(&the_id).await;

    the_outcome.map_err(|e| {
        let the_error = classify(e);
        error!("💀 import {} stopped: {:#}", the_id, the_error);
        the_error
    })
}

// typed errors pass through, anything else came from reading the source
fn classify(e: anyhow::Error) -> anyhow::Error {
    if e.downcast_ref::<ImportError>().is_some() {
        e
    } else {
        ImportError::transport(&e).into()
    }
}

/// 🏁 Marks an import Done once every row is accounted for, then deletes the upload.
#[derive(Debug)]
struct ImportFinalizer {
    history: Arc<dyn HistoryStore>,
    source: Arc<SourceBackend>,
    import_history_id: String,
    source_deleted: Mutex<bool>,
}

impl ImportFinalizer {
    async fn check(&self) -> Result<()> {
        let the_history = self
            .history
            .update(&self.import_history_id, HistoryUpdate::CompleteIfDrained)
            .await?;
        if the_history.status != ImportStatus::Done {
            return Ok(());
        }
        // flipped only after a successful delete, so a failed one is retried by the next check
        let mut the_deleted = self.source_deleted.lock().await;
        if !*the_deleted {
            info!(
                "✅ import {} done: {} ok, {} failed of {}",
                the_history.id, the_history.success, the_history.failed, the_history.total
            );
            self.source
                .delete_source()
                .await
                .with_context(|| format!("💀 Could not delete {}", self.source.label()))?;
            *the_deleted = true;
        }
        Ok(())
    }
}

/// 🧹 Deletes a history marked Removed once none of its records are left.
#[derive(Debug)]
struct RemovalCleanup {
    history: Arc<dyn HistoryStore>,
    import_history_id: String,
}

impl RemovalCleanup {
    async fn check(&self) -> Result<()> {
        let Some(the_history) = self.history.get(&self.import_history_id).await? else {
            return Ok(());
        };
        // every chunk pulls its ids, so an empty list means the last chunk is done
        if the_history.status == ImportStatus::Removed && the_history.ids.is_empty() {
            self.history.delete(&self.import_history_id).await?;
            info!("🗑️ import history {} deleted", self.import_history_id);
        }
        Ok(())
    }
}

/// 🛂 Validates and dispatches one batch at a time for one import.
struct ImportBatchHandler {
    ctx: WorkerContext,
    dispatcher: Arc<WorkerDispatcher>,
    store: Arc<dyn EntityStore>,
    import_history_id: String,
    content_type: ContentType,
    scope_brand_ids: Vec<String>,
    user: ImportUser,
    policy: EmptyValuePolicy,
    snapshot: ValidationSnapshot,
    total_rows: Option<u64>,
    properties: Option<Vec<FieldProperty>>,
    resolved_headers: Option<Arc<[String]>>,
}

impl ImportBatchHandler {
    async fn record(&self, update: HistoryUpdate) -> Result<()> {
        let the_guard = self.ctx.enter().await?;
        self.ctx
            .commit(&the_guard, &self.import_history_id, update)
            .await?;
        Ok(())
    }

    /// 🧮 Swap the counted total for the streamed row count when they differ.
    /// Quoted newlines and S3 Select counts can both disagree with the parser.
    async fn reconcile_total(&mut self, streamed_rows: u64) -> Result<()> {
        if self.total_rows == Some(streamed_rows) {
            return Ok(());
        }
        warn!(
            "⚠️ import {} counted {:?} rows but streamed {}, correcting the total",
            self.import_history_id, self.total_rows, streamed_rows
        );
        self.record(HistoryUpdate::SetTotal(streamed_rows)).await?;
        self.total_rows = Some(streamed_rows);
        Ok(())
    }
}

#[async_trait]
impl BatchHandler for ImportBatchHandler {
    async fn handle_batch(&mut self, batch: RowBatch, total_rows: u64) -> Result<()> {
        if self.total_rows.is_none() {
            self.record(HistoryUpdate::SetTotal(total_rows)).await?;
            self.total_rows = Some(total_rows);
        }

        if batch.is_empty() {
            if total_rows == 0 {
                warn!("⚠️ import {} has no data rows", self.import_history_id);
            }
            return Ok(());
        }

        if self.properties.is_none() {
            let the_field_names = batch.rows[0].field_names().to_vec();
            let the_properties = self
                .store
                .check_field_names(self.content_type, &the_field_names)
                .await?;
            self.resolved_headers = Some(
                the_properties
                    .iter()
                    .map(|p| p.name.clone())
                    .collect::<Vec<_>>()
                    .into(),
            );
            self.properties = Some(the_properties);
        }

        let mut the_valid = Vec::with_capacity(batch.len());
        let mut the_failed_rows = 0u64;
        let mut the_error_msgs = Vec::new();
        for row in batch.rows {
            // validate against the resolved column names, not the file's spelling
            let row = match self.resolved_headers {
                Some(ref headers) => row.with_headers(Arc::clone(headers)),
                None => row,
            };
            let the_errors = is_row_valid(self.content_type, &row, &self.snapshot);
            if the_errors.is_empty() {
                the_valid.push(row.into_values());
            } else {
                the_failed_rows += 1;
                the_error_msgs.extend(the_errors.iter().map(ToString::to_string));
            }
        }
        debug!(
            "🛂 batch for {}: {} valid, {} rejected",
            self.import_history_id,
            the_valid.len(),
            the_failed_rows
        );

        if the_failed_rows > 0 {
            self.record(HistoryUpdate::Failed {
                rows: the_failed_rows,
                error_msgs: the_error_msgs,
            })
            .await?;
        }

        if !the_valid.is_empty() {
            let the_task = BulkInsert {
                scope_brand_ids: self.scope_brand_ids.clone(),
                user: self.user.clone(),
                content_type: self.content_type,
                properties: self.properties.clone().unwrap_or_default(),
                import_history_id: self.import_history_id.clone(),
                percentage: batch_percentage(the_valid.len(), total_rows),
                result: the_valid,
            };
            self.dispatcher
                .create_worker_in(self.ctx.clone(), &self.import_history_id, the_task)
                .await?;
        }

        self.snapshot = before_import(self.store.as_ref(), self.content_type, self.policy).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::UploadType;
    use crate::history::InMemoryHistoryStore;
    use crate::store::InMemoryEntityStore;
    use serde_json::json;
    use std::time::Duration;

    struct Rig {
        orchestrator: Arc<Orchestrator>,
        store: InMemoryEntityStore,
        history: InMemoryHistoryStore,
        uploads: tempfile::TempDir,
    }

    fn rig_with(store: InMemoryEntityStore, bulk_limit: usize) -> Rig {
        let the_uploads = tempfile::tempdir().unwrap();
        let mut the_config = AppConfig::default();
        the_config.import.bulk_limit = bulk_limit;
        the_config.import.uploads_folder = the_uploads.path().to_path_buf();
        let the_history = InMemoryHistoryStore::new();
        Rig {
            orchestrator: Arc::new(Orchestrator::new(
                the_config,
                Arc::new(store.clone()),
                Arc::new(the_history.clone()),
            )),
            store,
            history: the_history,
            uploads: the_uploads,
        }
    }

    fn rig(bulk_limit: usize) -> Rig {
        rig_with(InMemoryEntityStore::new(), bulk_limit)
    }

    impl Rig {
        fn upload(&self, name: &str, csv: &str) {
            std::fs::write(self.uploads.path().join(name), csv).unwrap();
        }

        fn uploaded(&self, name: &str) -> bool {
            self.uploads.path().join(name).exists()
        }
    }

    fn create(name: &str, content_type: ContentType) -> ImportCreateContent {
        ImportCreateContent {
            file_name: name.to_string(),
            content_type,
            scope_brand_ids: vec!["brand-1".to_string()],
            user: ImportUser {
                id: "user-1".to_string(),
                username: None,
                email: None,
            },
            upload_type: UploadType::Local,
            file_type: "csv".to_string(),
        }
    }

    fn as_import_error(e: &anyhow::Error) -> &ImportError {
        e.downcast_ref::<ImportError>().expect("💀 expected a typed ImportError")
    }

    #[tokio::test]
    async fn the_one_where_a_known_email_is_turned_away() {
        let the_rig = rig(500);
        the_rig
            .store
            .seed(
                ContentType::Customer,
                json!({"primaryEmail": "dup@x.io"}).as_object().cloned().unwrap(),
            )
            .await;
        the_rig.upload("c.csv", "code,primaryEmail,primaryPhone\nC9,dup@x.io,999\n");

        let the_created = the_rig
            .orchestrator
            .receive_import_create(create("c.csv", ContentType::Customer))
            .await
            .unwrap();
        let the_history = the_rig.orchestrator.wait_for_import(&the_created.id).await.unwrap();

        assert_eq!(the_history.total, 1);
        assert_eq!(the_history.failed, 1);
        assert_eq!(the_history.success, 0);
        assert_eq!(the_history.error_msgs, vec!["Duplicated email: dup@x.io"]);
        assert_eq!(the_history.status, ImportStatus::Done);
        assert!(!the_rig.uploaded("c.csv"));
    }

    #[tokio::test]
    async fn the_one_where_ten_rows_make_ten_customers() {
        let the_rig = rig(500);
        let mut the_csv = String::from("code,primaryEmail\n");
        for i in 0..10 {
            the_csv.push_str(&format!("C{i},u{i}@x.io\n"));
        }
        the_rig.upload("ten.csv", &the_csv);

        let the_created = the_rig
            .orchestrator
            .receive_import_create(create("ten.csv", ContentType::Lead))
            .await
            .unwrap();
        let the_history = the_rig.orchestrator.wait_for_import(&the_created.id).await.unwrap();

        assert_eq!(the_history.total, 10);
        assert_eq!(the_history.success, 10);
        assert_eq!(the_history.ids.len(), 10);
        assert_eq!(the_history.percentage, 100.0);
        assert_eq!(the_history.status, ImportStatus::Done);
        assert_eq!(the_rig.store.records(ContentType::Lead).await.len(), 10);
    }

    #[tokio::test]
    async fn the_one_where_batch_two_sees_what_batch_one_committed() {
        let the_rig = rig(2);
        the_rig.upload(
            "co.csv",
            "primaryName,code\nAcme,K1\nAcme,K2\nAcme,K3\nGlobex,K1\n",
        );

        let the_created = the_rig
            .orchestrator
            .receive_import_create(create("co.csv", ContentType::Company))
            .await
            .unwrap();
        let the_history = the_rig.orchestrator.wait_for_import(&the_created.id).await.unwrap();

        // -- batch one: both Acmes pass, the snapshot had not seen either
        assert_eq!(the_history.success, 2);
        assert_eq!(the_history.failed, 2);
        assert_eq!(
            the_history.error_msgs,
            vec!["Duplicated name: Acme", "Duplicated code: K1"]
        );
        assert_eq!(the_history.success + the_history.failed, the_history.total);
        assert_eq!(the_history.status, ImportStatus::Done);
    }

    #[tokio::test]
    async fn the_one_where_a_wholly_rejected_last_batch_still_finishes() {
        let the_rig = rig(1);
        the_rig
            .store
            .seed(
                ContentType::Customer,
                json!({"code": "OLD"}).as_object().cloned().unwrap(),
            )
            .await;
        the_rig.upload("c.csv", "code\nNEW\nOLD\n");

        let the_created = the_rig
            .orchestrator
            .receive_import_create(create("c.csv", ContentType::Customer))
            .await
            .unwrap();
        let the_history = the_rig.orchestrator.wait_for_import(&the_created.id).await.unwrap();

        assert_eq!((the_history.success, the_history.failed), (1, 1));
        assert_eq!(the_history.status, ImportStatus::Done);
        assert!(!the_rig.uploaded("c.csv"));
    }

    #[tokio::test]
    async fn the_one_where_a_header_only_file_is_done_immediately() {
        let the_rig = rig(500);
        the_rig.upload("empty.csv", "code,primaryEmail\n");

        let the_created = the_rig
            .orchestrator
            .receive_import_create(create("empty.csv", ContentType::Customer))
            .await
            .unwrap();
        let the_history = the_rig.orchestrator.wait_for_import(&the_created.id).await.unwrap();

        assert_eq!(the_history.total, 0);
        assert_eq!(the_history.status, ImportStatus::Done);
        assert_eq!(the_history.percentage, 100.0);
    }

    #[tokio::test]
    async fn the_one_where_a_trailing_blank_line_is_not_a_row() {
        let the_rig = rig(500);
        the_rig.upload("blank.csv", "code,primaryEmail\nC1,a@x.io\nC2,b@x.io\n\n");

        let the_created = the_rig
            .orchestrator
            .receive_import_create(create("blank.csv", ContentType::Customer))
            .await
            .unwrap();
        let the_history = the_rig.orchestrator.wait_for_import(&the_created.id).await.unwrap();

        assert_eq!((the_history.total, the_history.success, the_history.failed), (2, 2, 0));
        assert_eq!(the_history.status, ImportStatus::Done);
        assert!(!the_rig.uploaded("blank.csv"));
    }

    #[tokio::test]
    async fn the_one_where_a_quoted_newline_fools_the_count_but_not_the_total() {
        let the_rig = rig(500);
        // three lines of data, two records
        the_rig.upload("quoted.csv", "code,description\nC1,\"two\nlines\"\nC2,plain\n");

        let the_created = the_rig
            .orchestrator
            .receive_import_create(create("quoted.csv", ContentType::Customer))
            .await
            .unwrap();
        let the_history = the_rig.orchestrator.wait_for_import(&the_created.id).await.unwrap();

        assert_eq!((the_history.total, the_history.success), (2, 2));
        assert_eq!(the_history.status, ImportStatus::Done);
        assert!(!the_rig.uploaded("quoted.csv"));
    }

    #[tokio::test]
    async fn the_one_where_a_shouty_header_still_catches_the_duplicate() {
        let the_rig = rig(500);
        the_rig
            .store
            .seed(
                ContentType::Customer,
                json!({"primaryEmail": "dup@x.io"}).as_object().cloned().unwrap(),
            )
            .await;
        the_rig.upload("c.csv", "CODE, PrimaryEmail\nC9,dup@x.io\n");

        let the_created = the_rig
            .orchestrator
            .receive_import_create(create("c.csv", ContentType::Customer))
            .await
            .unwrap();
        let the_history = the_rig.orchestrator.wait_for_import(&the_created.id).await.unwrap();

        assert_eq!((the_history.success, the_history.failed), (0, 1));
        assert_eq!(the_history.error_msgs, vec!["Duplicated email: dup@x.io"]);
        assert_eq!(the_rig.store.records(ContentType::Customer).await.len(), 1);
    }

    #[tokio::test]
    async fn the_one_where_a_failed_upload_delete_is_tried_again() {
        let the_dir = tempfile::tempdir().unwrap();
        let the_path = the_dir.path().join("stuck.csv");
        // a directory in the file's place makes remove_file fail
        std::fs::create_dir(&the_path).unwrap();
        let the_history = InMemoryHistoryStore::new();
        let the_created = the_history.create(ContentType::Customer, "u").await.unwrap();
        the_history
            .update(&the_created.id, HistoryUpdate::SetTotal(0))
            .await
            .unwrap();
        let the_finalizer = ImportFinalizer {
            history: Arc::new(the_history.clone()),
            source: Arc::new(SourceBackend::Local(crate::backends::LocalFileSource::new(
                &the_path,
            ))),
            import_history_id: the_created.id.clone(),
            source_deleted: Mutex::new(false),
        };

        assert!(the_finalizer.check().await.is_err());

        std::fs::remove_dir(&the_path).unwrap();
        std::fs::write(&the_path, "code\n").unwrap();
        the_finalizer.check().await.unwrap();

        assert!(!the_path.exists());
        assert_eq!(
            the_history.require(&the_created.id).await.unwrap().status,
            ImportStatus::Done
        );
    }

    #[tokio::test]
    async fn the_one_where_an_xlsx_never_gets_a_history() {
        let the_rig = rig(500);
        let mut the_content = create("c.xlsx", ContentType::Customer);
        the_content.file_type = "xlsx".to_string();

        let the_error = the_rig
            .orchestrator
            .receive_import_create(the_content)
            .await
            .unwrap_err();

        assert!(matches!(as_import_error(&the_error), ImportError::FatalInput(m) if m == "Invalid file type"));
        assert!(the_rig.history.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn the_one_where_a_missing_upload_is_a_transport_error() {
        let the_rig = rig(500);

        let the_created = the_rig
            .orchestrator
            .receive_import_create(create("nope.csv", ContentType::Customer))
            .await
            .unwrap();
        let the_error = the_rig.orchestrator.wait_for_import(&the_created.id).await.unwrap_err();

        assert!(matches!(as_import_error(&the_error), ImportError::Transport(_)));
    }

    #[tokio::test]
    async fn the_one_where_an_unknown_column_stops_the_import() {
        let the_rig = rig(500);
        the_rig.upload("c.csv", "code,favouriteColour\nC1,teal\n");

        let the_created = the_rig
            .orchestrator
            .receive_import_create(create("c.csv", ContentType::Customer))
            .await
            .unwrap();
        let the_error = the_rig.orchestrator.wait_for_import(&the_created.id).await.unwrap_err();

        assert!(matches!(as_import_error(&the_error), ImportError::FatalInput(_)));
        assert!(the_rig.store.records(ContentType::Customer).await.is_empty());
        assert!(the_rig.uploaded("c.csv"));
    }

    #[tokio::test]
    async fn the_one_where_a_failing_store_is_a_worker_error() {
        let the_store = InMemoryEntityStore::new();
        the_store.set_fail_inserts(true);
        let the_rig = rig_with(the_store, 500);
        the_rig.upload("p.csv", "name,code\nWidget,P1\n");

        let the_created = the_rig
            .orchestrator
            .receive_import_create(create("p.csv", ContentType::Product))
            .await
            .unwrap();
        let the_error = the_rig.orchestrator.wait_for_import(&the_created.id).await.unwrap_err();

        assert!(matches!(as_import_error(&the_error), ImportError::Worker(_)));
        let the_history = the_rig.history.require(&the_created.id).await.unwrap();
        assert_eq!(the_history.status, ImportStatus::InProgress);
    }

    #[tokio::test]
    async fn the_one_where_a_removed_import_takes_its_records_with_it() {
        let the_rig = rig(2);
        the_rig.upload(
            "t.csv",
            "name,priority\nT1,high\nT2,low\nT3,low\nT4,high\nT5,low\n",
        );
        let the_created = the_rig
            .orchestrator
            .receive_import_create(create("t.csv", ContentType::Task))
            .await
            .unwrap();
        the_rig.orchestrator.wait_for_import(&the_created.id).await.unwrap();
        assert_eq!(the_rig.store.records(ContentType::Task).await.len(), 5);

        the_rig.orchestrator.mark_removed(&the_created.id).await.unwrap();
        let the_ack = the_rig
            .orchestrator
            .receive_import_remove(ImportRemoveContent {
                content_type: ContentType::Task,
                import_history_id: the_created.id.clone(),
            })
            .await
            .unwrap();

        assert_eq!(the_ack, ImportAck::ok());
        assert!(the_rig.store.records(ContentType::Task).await.is_empty());
        assert!(the_rig.history.get(&the_created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn the_one_where_removing_without_the_removed_mark_keeps_the_history() {
        let the_rig = rig(500);
        the_rig.upload("d.csv", "name\nBig deal\n");
        let the_created = the_rig
            .orchestrator
            .receive_import_create(create("d.csv", ContentType::Deal))
            .await
            .unwrap();
        the_rig.orchestrator.wait_for_import(&the_created.id).await.unwrap();

        the_rig
            .orchestrator
            .receive_import_remove(ImportRemoveContent {
                content_type: ContentType::Deal,
                import_history_id: the_created.id.clone(),
            })
            .await
            .unwrap();

        let the_history = the_rig.history.require(&the_created.id).await.unwrap();
        assert!(the_history.ids.is_empty());
        assert_eq!(the_history.status, ImportStatus::Done);
    }

    #[tokio::test]
    async fn the_one_where_removing_a_stranger_is_fatal_input() {
        let the_rig = rig(500);

        let the_error = the_rig
            .orchestrator
            .receive_import_remove(ImportRemoveContent {
                content_type: ContentType::Deal,
                import_history_id: "who".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(as_import_error(&the_error), ImportError::FatalInput(_)));
    }

    #[tokio::test]
    async fn the_one_where_cancel_with_nothing_running_is_just_ok() {
        let the_rig = rig(500);
        assert_eq!(the_rig.orchestrator.receive_import_cancel().await, ImportAck::ok());
    }

    #[tokio::test]
    async fn the_one_where_cancel_freezes_the_counters() {
        let (the_store, the_gate) = InMemoryEntityStore::gated();
        let the_rig = rig_with(the_store, 1);
        the_rig.upload("c.csv", "code\nA\nB\nC\nD\n");

        let the_created = the_rig
            .orchestrator
            .receive_import_create(create("c.csv", ContentType::Customer))
            .await
            .unwrap();
        while the_rig.orchestrator.dispatcher().active_workers().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // -- the first worker is parked on the gate; cancel must wait it out
        let the_cancel = {
            let the_orchestrator = Arc::clone(&the_rig.orchestrator);
            tokio::spawn(async move { the_orchestrator.receive_import_cancel().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        the_gate.add_permits(100);
        assert_eq!(the_cancel.await.unwrap(), ImportAck::ok());

        let the_error = the_rig.orchestrator.wait_for_import(&the_created.id).await.unwrap_err();
        assert!(matches!(as_import_error(&the_error), ImportError::Cancelled));

        let the_frozen = the_rig.history.require(&the_created.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let the_later = the_rig.history.require(&the_created.id).await.unwrap();

        assert!(the_frozen.success <= 1);
        assert_eq!(the_later.success, the_frozen.success);
        assert_eq!(
            the_rig.store.records(ContentType::Customer).await.len() as u64,
            the_frozen.success
        );
        assert_eq!(the_later.status, ImportStatus::InProgress);
        assert!(the_rig.uploaded("c.csv"));
    }
}
