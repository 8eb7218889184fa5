//! 📥 bulkport: streams CSV uploads into a CRM, 500 rows at a time, with
//! duplicate checks that remember what the previous batch just wrote.
//!
//! Start at [`orchestrator::Orchestrator`]; everything else hangs off it.

pub mod app_config;
pub mod backends;
pub mod common;
pub mod dispatcher;
pub mod error;
pub mod fields;
pub mod history;
pub mod orchestrator;
mod progress;
pub mod store;
pub mod streamer;
pub mod validation;
pub mod workers;

use std::sync::Arc;

use anyhow::Result;

use crate::app_config::AppConfig;
use crate::common::ImportCreateContent;
use crate::history::{HistoryStore, ImportHistory};
use crate::orchestrator::Orchestrator;
use crate::store::EntityStore;

/// 🚀 One import, start to finish: accept it, wait for the stream, return the final history.
pub async fn run(
    app_config: AppConfig,
    store: Arc<dyn EntityStore>,
    history: Arc<dyn HistoryStore>,
    content: ImportCreateContent,
) -> Result<ImportHistory> {
    let the_orchestrator = Orchestrator::new(app_config, store, history);
    let the_created = the_orchestrator.receive_import_create(content).await?;
    the_orchestrator.wait_for_import(&the_created.id).await
}
