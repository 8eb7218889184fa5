//! 💾 Histories in a JSON file: the whole map is rewritten on every change.
//!
//! Good enough for a CLI that runs a handful of imports. The write goes to a
//! sibling temp file first and is renamed over the real one, so a crash mid-write
//! leaves the previous snapshot intact.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::history::{HistoryStore, HistoryUpdate, ImportHistory, not_found};

#[derive(Debug)]
pub struct JsonFileHistoryStore {
    path: PathBuf,
    histories: Mutex<BTreeMap<String, ImportHistory>>,
}

impl JsonFileHistoryStore {
    /// 📂 Load the file if it exists, start empty if it does not.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let the_path = path.as_ref().to_path_buf();
        let the_histories = match tokio::fs::read(&the_path).await {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).with_context(|| {
                format!(
                    "💀 History file '{}' is not valid JSON. Someone edited it by hand, didn't they.",
                    the_path.display()
                )
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("📜 no history file at '{}' yet, starting fresh", the_path.display());
                BTreeMap::new()
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("💀 Could not read history file '{}'", the_path.display())
                });
            }
        };

        Ok(Self {
            path: the_path,
            histories: Mutex::new(the_histories),
        })
    }

    async fn persist(&self, histories: &BTreeMap<String, ImportHistory>) -> Result<()> {
        let the_bytes = serde_json::to_vec_pretty(histories)
            .context("💀 Could not serialize import histories")?;
        let the_temp = self.path.with_extension("json.tmp");
        tokio::fs::write(&the_temp, the_bytes)
            .await
            .with_context(|| format!("💀 Could not write '{}'", the_temp.display()))?;
        tokio::fs::rename(&the_temp, &self.path)
            .await
            .with_context(|| format!("💀 Could not move history into '{}'", self.path.display()))?;
        debug!("💾 persisted {} histories", histories.len());
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for JsonFileHistoryStore {
    async fn insert(&self, history: ImportHistory) -> Result<()> {
        let mut the_histories = self.histories.lock().await;
        the_histories.insert(history.id.clone(), history);
        self.persist(&the_histories).await
    }

    async fn get(&self, id: &str) -> Result<Option<ImportHistory>> {
        Ok(self.histories.lock().await.get(id).cloned())
    }

    async fn update(&self, id: &str, update: HistoryUpdate) -> Result<ImportHistory> {
        let mut the_histories = self.histories.lock().await;
        let the_history = the_histories.get_mut(id).ok_or_else(|| not_found(id))?;
        update.apply(the_history);
        let the_updated = the_history.clone();
        self.persist(&the_histories).await?;
        Ok(the_updated)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut the_histories = self.histories.lock().await;
        let the_removed = the_histories.remove(id).is_some();
        if the_removed {
            self.persist(&the_histories).await?;
        }
        Ok(the_removed)
    }

    async fn list(&self) -> Result<Vec<ImportHistory>> {
        let mut the_list: Vec<_> = self.histories.lock().await.values().cloned().collect();
        the_list.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(the_list)
    }
}
