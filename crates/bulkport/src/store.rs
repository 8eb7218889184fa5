//! 🗄️ The entity store: the one door into the CRM database the pipeline gets to use.
//!
//! 🧠 Knowledge graph:
//! - The business schema (customers, companies, deals, ...) is somebody else's job.
//!   The pipeline only needs: unique-value lookups for duplicate checks, header
//!   resolution, bulk insert, bulk removal.
//! - Pattern: trait here, concrete impls next door. `InMemoryEntityStore` backs the
//!   tests and the CLI demo; a real deployment plugs its database in behind the trait.
//! - "Not deleted" filtering is the store's job, the pipeline never sees tombstones.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::common::ContentType;
use crate::fields::{self, FieldProperty};

pub(crate) mod in_mem;

pub use in_mem::{InMemoryEntityStore, StoredRecord};

/// 👤 The unique-ish fields of a customer (or lead) record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerKeys {
    #[serde(default)]
    pub primary_email: Option<String>,
    #[serde(default)]
    pub primary_phone: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

/// 🏢 The unique-ish fields of a company record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyKeys {
    #[serde(default)]
    pub primary_name: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

/// 🧾 Who and where an insert happens on behalf of.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertContext {
    pub user_id: String,
    pub scope_brand_ids: Vec<String>,
    pub import_history_id: String,
}

/// 🗄️ What the pipeline needs from the CRM database.
#[async_trait]
pub trait EntityStore: std::fmt::Debug + Send + Sync {
    /// Customer + lead key fields, deleted records excluded.
    async fn existing_customer_keys(&self) -> Result<Vec<CustomerKeys>>;

    /// Company key fields, deleted records excluded.
    async fn existing_company_keys(&self) -> Result<Vec<CompanyKeys>>;

    /// 🔍 Resolve CSV headers to properties. Unknown headers are fatal.
    ///
    /// The default knows the built-in fields and `customFieldsData.<id>` columns.
    /// Stores with a field registry override it.
    async fn check_field_names(
        &self,
        content_type: ContentType,
        field_names: &[String],
    ) -> Result<Vec<FieldProperty>> {
        fields::check_field_names(content_type, field_names)
    }

    /// 📥 Insert documents, returning the new record ids in input order.
    async fn insert_records(
        &self,
        content_type: ContentType,
        docs: Vec<Map<String, Value>>,
        ctx: &InsertContext,
    ) -> Result<Vec<String>>;

    /// 🗑️ Remove records by id. Returns how many were actually there.
    async fn remove_records(&self, content_type: ContentType, ids: &[String]) -> Result<u64>;
}
