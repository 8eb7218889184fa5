//! 📦 A CRM database that fits in a `HashMap`.
//!
//! Records live behind an `Arc<Mutex<...>>` so tests can keep a clone and peek
//! at what the workers inserted. Customers and leads share one collection, the
//! same way they share duplicate rules.
//!
//! 🧪 Two test knobs: `fail_inserts` makes every insert error out, and the
//! insert gate parks inserts until a test hands out permits.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, Semaphore};
use tracing::debug;

use crate::common::ContentType;
use crate::store::{CompanyKeys, CustomerKeys, EntityStore, InsertContext};

const STATUS_DELETED: &str = "deleted";

/// 📄 One stored entity.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub content_type: ContentType,
    pub status: String,
    pub doc: Map<String, Value>,
    pub scope_brand_ids: Vec<String>,
    pub created_by: String,
}

impl StoredRecord {
    fn field(&self, name: &str) -> Option<String> {
        self.doc.get(name).and_then(Value::as_str).map(str::to_string)
    }
}

// 🗂️ customers and leads are one collection, everyone else gets their own
fn collection_of(content_type: ContentType) -> ContentType {
    if content_type.is_customer_like() {
        ContentType::Customer
    } else {
        content_type
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryEntityStore {
    records: Arc<Mutex<HashMap<ContentType, Vec<StoredRecord>>>>,
    fail_inserts: Arc<AtomicBool>,
    insert_gate: Option<Arc<Semaphore>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🚧 A store whose inserts wait for a permit from the returned semaphore.
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let the_gate = Arc::new(Semaphore::new(0));
        let the_store = Self {
            insert_gate: Some(Arc::clone(&the_gate)),
            ..Self::default()
        };
        (the_store, the_gate)
    }

    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// 🌱 Seed a pre-existing record, returns its id.
    pub async fn seed(&self, content_type: ContentType, doc: Map<String, Value>) -> String {
        self.seed_with_status(content_type, doc, "active").await
    }

    pub async fn seed_with_status(
        &self,
        content_type: ContentType,
        doc: Map<String, Value>,
        status: &str,
    ) -> String {
        let the_id = uuid::Uuid::new_v4().to_string();
        self.records
            .lock()
            .await
            .entry(collection_of(content_type))
            .or_default()
            .push(StoredRecord {
                id: the_id.clone(),
                content_type,
                status: status.to_string(),
                doc,
                scope_brand_ids: Vec::new(),
                created_by: String::new(),
            });
        the_id
    }

    /// 🔍 Everything in the collection `content_type` lives in, tombstones included.
    pub async fn records(&self, content_type: ContentType) -> Vec<StoredRecord> {
        self.records
            .lock()
            .await
            .get(&collection_of(content_type))
            .cloned()
            .unwrap_or_default()
    }

    async fn live_records(&self, collection: ContentType) -> Vec<StoredRecord> {
        self.records(collection)
            .await
            .into_iter()
            .filter(|r| r.status != STATUS_DELETED)
            .collect()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn existing_customer_keys(&self) -> Result<Vec<CustomerKeys>> {
        Ok(self
            .live_records(ContentType::Customer)
            .await
            .iter()
            .map(|r| CustomerKeys {
                primary_email: r.field("primaryEmail"),
                primary_phone: r.field("primaryPhone"),
                code: r.field("code"),
            })
            .collect())
    }

    async fn existing_company_keys(&self) -> Result<Vec<CompanyKeys>> {
        Ok(self
            .live_records(ContentType::Company)
            .await
            .iter()
            .map(|r| CompanyKeys {
                primary_name: r.field("primaryName"),
                code: r.field("code"),
            })
            .collect())
    }

    async fn insert_records(
        &self,
        content_type: ContentType,
        docs: Vec<Map<String, Value>>,
        ctx: &InsertContext,
    ) -> Result<Vec<String>> {
        if let Some(ref gate) = self.insert_gate {
            gate.acquire()
                .await
                .context("💀 insert gate closed")?
                .forget();
        }
        if self.fail_inserts.load(Ordering::SeqCst) {
            anyhow::bail!("💀 the database is having a day (fail_inserts is on)");
        }

        let mut the_records = self.records.lock().await;
        let the_collection = the_records.entry(collection_of(content_type)).or_default();
        let mut the_ids = Vec::with_capacity(docs.len());
        for doc in docs {
            let the_id = uuid::Uuid::new_v4().to_string();
            the_collection.push(StoredRecord {
                id: the_id.clone(),
                content_type,
                status: "active".to_string(),
                doc,
                scope_brand_ids: ctx.scope_brand_ids.clone(),
                created_by: ctx.user_id.clone(),
            });
            the_ids.push(the_id);
        }
        debug!("📥 inserted {} {} records", the_ids.len(), content_type);
        Ok(the_ids)
    }

    async fn remove_records(&self, content_type: ContentType, ids: &[String]) -> Result<u64> {
        let mut the_records = self.records.lock().await;
        let Some(the_collection) = the_records.get_mut(&collection_of(content_type)) else {
            return Ok(0);
        };
        let the_before = the_collection.len();
        let the_doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        the_collection.retain(|r| !the_doomed.contains(r.id.as_str()));
        Ok((the_before - the_collection.len()) as u64)
    }
}
