//! 📥 BulkInsert: turn one batch of validated rows into records, count them as successes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::common::{ContentType, ImportUser};
use crate::dispatcher::{Worker, WorkerContext};
use crate::fields::{FieldProperty, build_document};
use crate::history::HistoryUpdate;
use crate::store::InsertContext;

/// 📦 One worker task: the valid rows of a batch, positional, in header order.
#[derive(Debug, Clone)]
pub struct BulkInsert {
    pub scope_brand_ids: Vec<String>,
    pub user: ImportUser,
    pub content_type: ContentType,
    pub properties: Vec<FieldProperty>,
    pub import_history_id: String,
    pub result: Vec<Vec<String>>,
    /// This batch's share of the whole import, in percentage points.
    pub percentage: f64,
}

#[async_trait]
impl Worker for BulkInsert {
    fn name(&self) -> &'static str {
        "bulkInsert"
    }

    async fn run(self, ctx: WorkerContext) -> Result<()> {
        if self.result.is_empty() {
            return Ok(());
        }

        let the_docs = self
            .result
            .iter()
            .map(|values| build_document(&self.properties, values))
            .collect();
        let the_insert_ctx = InsertContext {
            user_id: self.user.id.clone(),
            scope_brand_ids: self.scope_brand_ids.clone(),
            import_history_id: self.import_history_id.clone(),
        };

        let the_guard = ctx.enter().await?;
        let the_ids = ctx
            .store()
            .insert_records(self.content_type, the_docs, &the_insert_ctx)
            .await
            .with_context(|| {
                format!(
                    "💀 Inserting {} {} rows for import {} failed",
                    self.result.len(),
                    self.content_type,
                    self.import_history_id
                )
            })?;
        debug!("📥 committed {} {} records", the_ids.len(), self.content_type);

        ctx.commit(
            &the_guard,
            &self.import_history_id,
            HistoryUpdate::Succeeded {
                ids: the_ids,
                percentage: self.percentage,
            },
        )
        .await?;
        Ok(())
    }
}
