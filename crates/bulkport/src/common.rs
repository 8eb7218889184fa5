//! 📦 Common data structures: the rows, the batches, and the request shapes
//! that ferry a CSV from "uploaded" to "imported".
//!
//! 🎬 COLD OPEN: a 40MB customer export lands in the uploads folder. Nobody
//! deduplicated it. Nobody ever deduplicates it. Each line becomes a [`RawRow`],
//! each 500 of them become a [`RowBatch`], and the batches march single file
//! through validation like a very orderly conga line.
//!
//! 🦆

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ============================================================
//  🏷️ ContentType: what kind of thing is this CSV full of?
// ============================================================

/// 🏷️ The entity kind an import targets. Decides which duplicate rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Customer,
    Company,
    Lead,
    Product,
    Deal,
    Task,
    Ticket,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Company => "company",
            Self::Lead => "lead",
            Self::Product => "product",
            Self::Deal => "deal",
            Self::Task => "task",
            Self::Ticket => "ticket",
        }
    }

    /// 👤 Customers and leads live in the same collection and share the same rules.
    pub fn is_customer_like(&self) -> bool {
        matches!(self, Self::Customer | Self::Lead)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ContentType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // -- 🎯 piggyback on serde so the two spellings can never drift apart
        serde_json::from_value(serde_json::Value::String(s.to_ascii_lowercase()))
            .map_err(|_| anyhow::anyhow!("💀 '{s}' is not an importable content type"))
    }
}

// ============================================================
//  🚚 UploadType: where did the file land?
// ============================================================

/// 🚚 Where the uploaded CSV lives: the local uploads folder or an S3 bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UploadType {
    #[default]
    #[serde(rename = "local", alias = "Local")]
    Local,
    #[serde(rename = "AWS", alias = "aws")]
    Aws,
}

// ============================================================
//  📄 RawRow / RowBatch
// ============================================================

/// 📄 One parsed CSV data row, keyed by the header row.
///
/// Headers are shared across every row of a file via `Arc`, so a 500-row batch
/// carries one header list and 500 value lists, not 500 hash maps.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    headers: Arc<[String]>,
    values: Vec<String>,
}

impl RawRow {
    pub fn new(headers: Arc<[String]>, values: Vec<String>) -> Self {
        Self { headers, values }
    }

    /// 🔍 Value of a column by header name. `None` if the column does not exist.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.headers
            .iter()
            .position(|h| h == field)
            .and_then(|idx| self.values.get(idx))
            .map(String::as_str)
    }

    /// Header names in file order.
    pub fn field_names(&self) -> &[String] {
        &self.headers
    }

    /// Values in header order, the positional form workers receive.
    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn into_values(self) -> Vec<String> {
        self.values
    }

    /// 🏷️ Same values under new header names, e.g. the resolved spelling of each column.
    pub fn with_headers(self, headers: Arc<[String]>) -> Self {
        Self {
            headers,
            values: self.values,
        }
    }
}

/// 📦 A bounded run of rows, handled as one unit. Never longer than the bulk limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBatch {
    pub rows: Vec<RawRow>,
}

impl RowBatch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ============================================================
//  📨 Request / response shapes
// ============================================================

/// 👤 The user who kicked off the import. Only the id matters to the pipeline,
/// the rest rides along to the worker untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportUser {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// 📨 Payload of `receive_import_create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportCreateContent {
    pub file_name: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    #[serde(default)]
    pub scope_brand_ids: Vec<String>,
    pub user: ImportUser,
    #[serde(default)]
    pub upload_type: UploadType,
    pub file_type: String,
}

/// 📨 Payload of `receive_import_remove`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRemoveContent {
    pub content_type: ContentType,
    pub import_history_id: String,
}

/// ✅ `{id}`: the history id of a freshly accepted import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportCreated {
    pub id: String,
}

/// ✅ `{status: "ok"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportAck {
    pub status: String,
}

impl ImportAck {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}
