//! 📜 Import History: the progress record of one import, and where it is kept.
//!
//! 🧠 Knowledge graph:
//! - Lifecycle: `Pending` (created) → `InProgress` (first batch) → `Done`
//!   (`success + failed == total`). `Removed` can be set from outside at any point.
//! - Every mutation is a [`HistoryUpdate`], applied under the store's lock.
//!   Counters only ever increment and lists only ever append (or pull, for
//!   removal), so two workers finishing at once cannot clobber each other.
//! - Stores: [`InMemoryHistoryStore`] for tests and embedding,
//!   [`JsonFileHistoryStore`] for the CLI (one JSON snapshot rewritten per change).

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::ContentType;
use crate::error::ImportError;

pub(crate) mod file;
pub(crate) mod in_mem;

pub use file::JsonFileHistoryStore;
pub use in_mem::InMemoryHistoryStore;

/// 🚦 Where an import is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ImportStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Removed,
}

impl std::fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let the_label = match self {
            Self::Pending => "Pending",
            Self::InProgress => "In Progress",
            Self::Done => "Done",
            Self::Removed => "Removed",
        };
        f.write_str(the_label)
    }
}

/// 📜 One import's progress record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportHistory {
    #[serde(rename = "_id")]
    pub id: String,
    pub content_type: ContentType,
    pub user_id: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub success: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub percentage: f64,
    #[serde(default)]
    pub status: ImportStatus,
    #[serde(default)]
    pub error_msgs: Vec<String>,
    #[serde(default)]
    pub ids: Vec<String>,
}

impl ImportHistory {
    pub fn new(content_type: ContentType, user_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content_type,
            user_id: user_id.into(),
            date: Utc::now(),
            total: 0,
            success: 0,
            failed: 0,
            percentage: 0.0,
            status: ImportStatus::Pending,
            error_msgs: Vec::new(),
            ids: Vec::new(),
        }
    }

    /// ✅ Every row is accounted for, one way or the other.
    pub fn is_drained(&self) -> bool {
        self.success + self.failed == self.total
    }

    fn is_live(&self) -> bool {
        matches!(self.status, ImportStatus::Pending | ImportStatus::InProgress)
    }
}

/// ✏️ One atomic change to a history record.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryUpdate {
    /// Row total from the source. Moves a pending import to InProgress.
    SetTotal(u64),
    /// A worker committed these record ids, worth `percentage` points.
    Succeeded { ids: Vec<String>, percentage: f64 },
    /// Rows rejected by validation, with their messages.
    Failed { rows: u64, error_msgs: Vec<String> },
    /// Done + 100% if every row is accounted for. No-op otherwise.
    CompleteIfDrained,
    /// Records were removed: forget their ids.
    PullIds(Vec<String>),
    SetStatus(ImportStatus),
}

impl HistoryUpdate {
    pub fn apply(self, history: &mut ImportHistory) {
        match self {
            Self::SetTotal(total) => {
                history.total = total;
                if history.status == ImportStatus::Pending {
                    history.status = ImportStatus::InProgress;
                }
            }
            Self::Succeeded { ids, percentage } => {
                history.success += ids.len() as u64;
                history.ids.extend(ids);
                history.percentage = round3((history.percentage + percentage).min(100.0));
            }
            Self::Failed { rows, error_msgs } => {
                history.failed += rows;
                history.error_msgs.extend(error_msgs);
            }
            Self::CompleteIfDrained => {
                if history.is_live() && history.is_drained() {
                    history.status = ImportStatus::Done;
                    history.percentage = 100.0;
                }
            }
            Self::PullIds(ids) => {
                let the_pulled: HashSet<&str> = ids.iter().map(String::as_str).collect();
                history.ids.retain(|id| !the_pulled.contains(id.as_str()));
            }
            Self::SetStatus(status) => history.status = status,
        }
    }
}

/// 🎯 A batch's share of the import, rounded to three decimals.
pub fn batch_percentage(rows: usize, total_rows: u64) -> f64 {
    if total_rows == 0 {
        return 0.0;
    }
    round3(rows as f64 / total_rows as f64 * 100.0)
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

pub(crate) fn not_found(id: &str) -> anyhow::Error {
    ImportError::fatal(format!("Import history not found: {id}")).into()
}

/// 🗃️ Where histories live.
#[async_trait]
pub trait HistoryStore: std::fmt::Debug + Send + Sync {
    async fn insert(&self, history: ImportHistory) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<ImportHistory>>;

    /// Apply one update atomically and return the result. Missing id is FatalInput.
    async fn update(&self, id: &str, update: HistoryUpdate) -> Result<ImportHistory>;

    /// Returns whether anything was deleted.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Newest first.
    async fn list(&self) -> Result<Vec<ImportHistory>>;

    /// 🆕 Create and persist a fresh Pending history.
    async fn create(&self, content_type: ContentType, user_id: &str) -> Result<ImportHistory> {
        let the_history = ImportHistory::new(content_type, user_id);
        self.insert(the_history.clone()).await?;
        Ok(the_history)
    }

    /// 🔍 Like `get`, but a missing history is FatalInput.
    async fn require(&self, id: &str) -> Result<ImportHistory> {
        self.get(id).await?.ok_or_else(|| not_found(id))
    }
}
