//! 🔍 Field resolution: CSV header → entity property, and the value hygiene
//! applied before a row becomes a document.
//!
//! A header is either a built-in property of the content type (matched
//! case-insensitively, stored under its canonical spelling) or a custom field
//! column written as `customFieldsData.<fieldId>`. Anything else aborts the
//! import: a column we cannot place is a column we would silently drop.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::common::ContentType;
use crate::error::ImportError;

const CUSTOM_FIELD_PREFIX: &str = "customFieldsData.";

const SEX_FIELD: &str = "sex";

// ISO/IEC 5218 codes, keyed by the label a spreadsheet would show
const SEX_OPTIONS: &[(&str, u64)] = &[
    ("Not known", 0),
    ("Male", 1),
    ("Female", 2),
    ("Not applicable", 9),
];

const CUSTOMER_FIELDS: &[&str] = &[
    "code",
    "firstName",
    "middleName",
    "lastName",
    "primaryEmail",
    "primaryPhone",
    "sex",
    "birthDate",
    "position",
    "department",
    "leadStatus",
    "hasAuthority",
    "description",
    "doNotDisturb",
    "ownerId",
    "emailValidationStatus",
    "phoneValidationStatus",
];

const COMPANY_FIELDS: &[&str] = &[
    "primaryName",
    "code",
    "size",
    "industry",
    "website",
    "plan",
    "primaryEmail",
    "primaryPhone",
    "businessType",
    "description",
    "ownerId",
    "location",
    "parentCompanyId",
];

const PRODUCT_FIELDS: &[&str] = &[
    "name",
    "code",
    "type",
    "description",
    "sku",
    "unitPrice",
    "categoryCode",
];

const BOARD_ITEM_FIELDS: &[&str] = &[
    "name",
    "description",
    "closeDate",
    "priority",
    "stageName",
    "boardName",
    "pipelineName",
    "assignedUserEmail",
];

fn basic_fields(content_type: ContentType) -> &'static [&'static str] {
    match content_type {
        ContentType::Customer | ContentType::Lead => CUSTOMER_FIELDS,
        ContentType::Company => COMPANY_FIELDS,
        ContentType::Product => PRODUCT_FIELDS,
        ContentType::Deal | ContentType::Task | ContentType::Ticket => BOARD_ITEM_FIELDS,
    }
}

/// 🏷️ Where a column's value goes in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FieldKind {
    /// A top-level property of the entity.
    Basic,
    /// An entry of the entity's custom field data.
    CustomField { field_id: String },
}

/// 📌 One resolved column, in header order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldProperty {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
}

/// 🔍 Resolve every header of a file, in order. Fails on the first unknown one.
pub fn check_field_names(
    content_type: ContentType,
    field_names: &[String],
) -> Result<Vec<FieldProperty>> {
    let the_known = basic_fields(content_type);

    field_names
        .iter()
        .map(|raw| -> Result<FieldProperty> {
            let the_name = raw.trim();

            if let Some(field_id) = the_name.strip_prefix(CUSTOM_FIELD_PREFIX) {
                if field_id.is_empty() {
                    return Err(ImportError::fatal(format!("Bad column name {the_name}")).into());
                }
                return Ok(FieldProperty {
                    name: the_name.to_string(),
                    kind: FieldKind::CustomField {
                        field_id: field_id.to_string(),
                    },
                });
            }

            the_known
                .iter()
                .find(|known| known.eq_ignore_ascii_case(the_name))
                .map(|known| FieldProperty {
                    name: (*known).to_string(),
                    kind: FieldKind::Basic,
                })
                .ok_or_else(|| ImportError::fatal(format!("Bad column name {the_name}")).into())
        })
        .collect()
}

/// 🧹 Drop keys whose value is `""`, `"unknown"` or an empty array.
pub fn clear_empty_values(mut doc: Map<String, Value>) -> Map<String, Value> {
    doc.retain(|_, value| match value {
        Value::String(s) => !(s.is_empty() || s == "unknown"),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    });
    doc
}

/// ⚧ Label → stored code, case-insensitive. `None` for anything unrecognised.
pub fn pronoun_code(label: &str) -> Option<u64> {
    let the_label = label.trim();
    SEX_OPTIONS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(the_label))
        .map(|&(_, code)| code)
}

/// 🏗️ Zip resolved properties with one row's positional values into a document.
///
/// Custom field columns collect into `customFieldsData: [{field, value}]`.
/// A `sex` label becomes its numeric code and is dropped when unrecognised.
/// Values beyond the property list are ignored, missing ones are skipped.
pub fn build_document(properties: &[FieldProperty], values: &[String]) -> Map<String, Value> {
    let mut the_doc = Map::new();
    let mut the_custom = Vec::new();

    for (property, value) in properties.iter().zip(values) {
        match property.kind {
            FieldKind::Basic if property.name == SEX_FIELD => {
                if let Some(code) = pronoun_code(value) {
                    the_doc.insert(property.name.clone(), Value::from(code));
                }
            }
            FieldKind::Basic => {
                the_doc.insert(property.name.clone(), Value::String(value.clone()));
            }
            FieldKind::CustomField { ref field_id } => {
                if !value.is_empty() {
                    let mut the_entry = Map::new();
                    the_entry.insert("field".to_string(), Value::String(field_id.clone()));
                    the_entry.insert("value".to_string(), Value::String(value.clone()));
                    the_custom.push(Value::Object(the_entry));
                }
            }
        }
    }

    the_doc.insert("customFieldsData".to_string(), Value::Array(the_custom));
    clear_empty_values(the_doc)
}
