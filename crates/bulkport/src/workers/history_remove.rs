//! 🗑️ ImportHistoryRemove: delete one chunk of imported records and drop their ids from the history.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::common::ContentType;
use crate::dispatcher::{Worker, WorkerContext};
use crate::history::HistoryUpdate;

#[derive(Debug, Clone)]
pub struct ImportHistoryRemove {
    pub content_type: ContentType,
    pub import_history_id: String,
    /// Record ids, at most one bulk limit of them.
    pub result: Vec<String>,
}

#[async_trait]
impl Worker for ImportHistoryRemove {
    fn name(&self) -> &'static str {
        "importHistoryRemove"
    }

    async fn run(self, ctx: WorkerContext) -> Result<()> {
        let the_guard = ctx.enter().await?;
        let the_removed = ctx
            .store()
            .remove_records(self.content_type, &self.result)
            .await
            .with_context(|| {
                format!(
                    "💀 Removing {} {} records of import {} failed",
                    self.result.len(),
                    self.content_type,
                    self.import_history_id
                )
            })?;
        debug!(
            "🗑️ removed {} of {} {} records",
            the_removed,
            self.result.len(),
            self.content_type
        );

        ctx.commit(
            &the_guard,
            &self.import_history_id,
            HistoryUpdate::PullIds(self.result),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::WorkerDispatcher;
    use crate::history::{HistoryStore, InMemoryHistoryStore};
    use crate::store::InMemoryEntityStore;
    use serde_json::Map;
    use std::sync::Arc;

    #[tokio::test]
    async fn the_one_where_a_chunk_of_records_goes_away() {
        let the_store = InMemoryEntityStore::new();
        let the_history = InMemoryHistoryStore::new();
        let the_dispatcher =
            WorkerDispatcher::new(Arc::new(the_store.clone()), Arc::new(the_history.clone()));
        let the_a = the_store.seed(ContentType::Company, Map::new()).await;
        let the_b = the_store.seed(ContentType::Company, Map::new()).await;
        let the_record = the_history.create(ContentType::Company, "u").await.unwrap();
        the_history
            .update(
                &the_record.id,
                HistoryUpdate::Succeeded {
                    ids: vec![the_a.clone(), the_b.clone()],
                    percentage: 100.0,
                },
            )
            .await
            .unwrap();

        the_dispatcher
            .create_worker(
                &the_record.id,
                ImportHistoryRemove {
                    content_type: ContentType::Company,
                    import_history_id: the_record.id.clone(),
                    result: vec![the_a.clone()],
                },
            )
            .await
            .unwrap();

        let the_left = the_store.records(ContentType::Company).await;
        assert_eq!(the_left.len(), 1);
        assert_eq!(the_left[0].id, the_b);
        assert_eq!(the_history.require(&the_record.id).await.unwrap().ids, vec![the_b]);
    }
}
