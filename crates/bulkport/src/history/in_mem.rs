//! 🧠 Histories in a `HashMap` behind an `Arc<Mutex<..>>`. Clone it, keep a
//! handle in the test, inspect after the import finishes.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::history::{HistoryStore, HistoryUpdate, ImportHistory, not_found};

#[derive(Debug, Default, Clone)]
pub struct InMemoryHistoryStore {
    histories: Arc<Mutex<HashMap<String, ImportHistory>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn insert(&self, history: ImportHistory) -> Result<()> {
        self.histories.lock().await.insert(history.id.clone(), history);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ImportHistory>> {
        Ok(self.histories.lock().await.get(id).cloned())
    }

    async fn update(&self, id: &str, update: HistoryUpdate) -> Result<ImportHistory> {
        let mut the_histories = self.histories.lock().await;
        let the_history = the_histories.get_mut(id).ok_or_else(|| not_found(id))?;
        update.apply(the_history);
        Ok(the_history.clone())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.histories.lock().await.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<ImportHistory>> {
        let mut the_list: Vec<_> = self.histories.lock().await.values().cloned().collect();
        the_list.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(the_list)
    }
}
