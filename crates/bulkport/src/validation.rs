//! 🛂 Validation: the duplicate check every row passes before it reaches a worker.
//!
//! 🧠 Knowledge graph:
//! - [`before_import`] builds a [`ValidationSnapshot`]: the unique values already
//!   in the store for one content type. It is rebuilt after every batch, never
//!   patched, so rows committed by batch N are visible to batch N+1.
//! - [`is_row_valid`] checks one row against that snapshot and returns every
//!   violation it finds. An empty list means the row may go.
//! - Only rows already in the store count. Two duplicates inside the SAME batch
//!   both pass; the snapshot has not seen either yet.

use std::collections::HashSet;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::debug;

use crate::common::{ContentType, RawRow};
use crate::store::EntityStore;

/// ⚖️ What to do with a row whose unique field is blank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyValuePolicy {
    /// Blank values are never duplicates.
    #[default]
    Ignore,
    /// Blank values collide with every other blank value, store included.
    Flag,
}

impl EmptyValuePolicy {
    pub fn from_flag(flag_empty_duplicates: bool) -> Self {
        if flag_empty_duplicates { Self::Flag } else { Self::Ignore }
    }
}

/// 🏷️ The field a duplicate was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateField {
    Code,
    Email,
    Phone,
    Name,
}

impl DuplicateField {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Name => "name",
        }
    }

    /// The CSV column this check reads.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Email => "primaryEmail",
            Self::Phone => "primaryPhone",
            Self::Name => "primaryName",
        }
    }
}

/// ❌ One row-level violation. Folded into the import history, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Duplicated {}: {}", .field.label(), .value)]
pub struct RowValidationError {
    pub field: DuplicateField,
    pub value: String,
}

/// 📸 Unique values already taken, for one content type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationSnapshot {
    pub existing_emails: HashSet<String>,
    pub existing_phones: HashSet<String>,
    pub existing_codes: HashSet<String>,
    pub existing_names: HashSet<String>,
    pub policy: EmptyValuePolicy,
}

impl ValidationSnapshot {
    fn set_for(&self, field: DuplicateField) -> &HashSet<String> {
        match field {
            DuplicateField::Code => &self.existing_codes,
            DuplicateField::Email => &self.existing_emails,
            DuplicateField::Phone => &self.existing_phones,
            DuplicateField::Name => &self.existing_names,
        }
    }

    pub fn len(&self) -> usize {
        self.existing_emails.len()
            + self.existing_phones.len()
            + self.existing_codes.len()
            + self.existing_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 🔢 The fields checked for a content type, in the order errors are reported.
pub fn checked_fields(content_type: ContentType) -> &'static [DuplicateField] {
    match content_type {
        ContentType::Customer | ContentType::Lead => &[
            DuplicateField::Code,
            DuplicateField::Email,
            DuplicateField::Phone,
        ],
        ContentType::Company => &[DuplicateField::Name, DuplicateField::Code],
        _ => &[],
    }
}

/// 📸 Load the snapshot for `content_type` from the store. Missing values count as `""`.
pub async fn before_import<S: EntityStore + ?Sized>(
    store: &S,
    content_type: ContentType,
    policy: EmptyValuePolicy,
) -> Result<ValidationSnapshot> {
    let mut the_snapshot = ValidationSnapshot {
        policy,
        ..ValidationSnapshot::default()
    };

    if content_type.is_customer_like() {
        let the_keys = store
            .existing_customer_keys()
            .await
            .context("💀 Could not load existing customer keys for duplicate checks")?;
        for key in the_keys {
            the_snapshot.existing_emails.insert(key.primary_email.unwrap_or_default());
            the_snapshot.existing_phones.insert(key.primary_phone.unwrap_or_default());
            the_snapshot.existing_codes.insert(key.code.unwrap_or_default());
        }
    } else if content_type == ContentType::Company {
        let the_keys = store
            .existing_company_keys()
            .await
            .context("💀 Could not load existing company keys for duplicate checks")?;
        for key in the_keys {
            the_snapshot.existing_names.insert(key.primary_name.unwrap_or_default());
            the_snapshot.existing_codes.insert(key.code.unwrap_or_default());
        }
    }

    debug!(
        "📸 {} snapshot holds {} unique values",
        content_type,
        the_snapshot.len()
    );
    Ok(the_snapshot)
}

/// 🛂 Every duplicate violation of one row. Empty = valid.
///
/// A column missing from the file is never checked.
pub fn is_row_valid(
    content_type: ContentType,
    row: &RawRow,
    snapshot: &ValidationSnapshot,
) -> Vec<RowValidationError> {
    checked_fields(content_type)
        .iter()
        .filter_map(|&field| {
            let the_value = row.get(field.column())?;
            if snapshot.policy == EmptyValuePolicy::Ignore && the_value.trim().is_empty() {
                return None;
            }
            snapshot
                .set_for(field)
                .contains(the_value)
                .then(|| RowValidationError {
                    field,
                    value: the_value.to_string(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryEntityStore;
    use serde_json::json;
    use std::sync::Arc;

    fn row(headers: &[&str], values: &[&str]) -> RawRow {
        let the_headers: Arc<[String]> = headers.iter().map(|h| h.to_string()).collect::<Vec<_>>().into();
        RawRow::new(the_headers, values.iter().map(|v| v.to_string()).collect())
    }

    fn snapshot_of(emails: &[&str], phones: &[&str], codes: &[&str], names: &[&str]) -> ValidationSnapshot {
        let to_set = |xs: &[&str]| xs.iter().map(|x| x.to_string()).collect();
        ValidationSnapshot {
            existing_emails: to_set(emails),
            existing_phones: to_set(phones),
            existing_codes: to_set(codes),
            existing_names: to_set(names),
            policy: EmptyValuePolicy::Ignore,
        }
    }

    #[test]
    fn the_one_where_every_customer_duplicate_is_reported_in_order() {
        let the_snapshot = snapshot_of(&["a@x.io"], &["555"], &["C1"], &[]);
        let the_row = row(&["code", "primaryEmail", "primaryPhone"], &["C1", "a@x.io", "555"]);

        let the_errors: Vec<String> = is_row_valid(ContentType::Customer, &the_row, &the_snapshot)
            .iter()
            .map(ToString::to_string)
            .collect();

        assert_eq!(
            the_errors,
            vec!["Duplicated code: C1", "Duplicated email: a@x.io", "Duplicated phone: 555"]
        );
    }

    #[test]
    fn the_one_where_companies_care_about_names_and_codes() {
        let the_snapshot = snapshot_of(&["dup@x.io"], &[], &["K9"], &["Acme"]);
        let the_row = row(&["primaryName", "code", "primaryEmail"], &["Acme", "K1", "dup@x.io"]);

        let the_errors = is_row_valid(ContentType::Company, &the_row, &the_snapshot);

        assert_eq!(the_errors.len(), 1);
        assert_eq!(the_errors[0].to_string(), "Duplicated name: Acme");
        assert_eq!(the_errors[0].field, DuplicateField::Name);
    }

    #[test]
    fn the_one_where_deals_are_always_welcome() {
        let the_snapshot = snapshot_of(&["a@x.io"], &[], &["C1"], &["Acme"]);
        let the_row = row(&["code", "name"], &["C1", "Acme"]);

        assert!(is_row_valid(ContentType::Deal, &the_row, &the_snapshot).is_empty());
    }

    #[test]
    fn the_one_where_blank_values_only_collide_when_asked_to() {
        let mut the_snapshot = snapshot_of(&[""], &[], &[], &[]);
        let the_row = row(&["primaryEmail"], &[""]);

        assert!(is_row_valid(ContentType::Lead, &the_row, &the_snapshot).is_empty());

        the_snapshot.policy = EmptyValuePolicy::Flag;
        let the_errors = is_row_valid(ContentType::Lead, &the_row, &the_snapshot);
        assert_eq!(the_errors[0].to_string(), "Duplicated email: ");
    }

    #[test]
    fn the_one_where_absent_columns_are_not_checked() {
        let the_snapshot = snapshot_of(&[""], &[""], &[""], &[]);
        let mut the_flagging = the_snapshot.clone();
        the_flagging.policy = EmptyValuePolicy::Flag;
        let the_row = row(&["firstName"], &["Ann"]);

        assert!(is_row_valid(ContentType::Customer, &the_row, &the_flagging).is_empty());
    }

    #[tokio::test]
    async fn the_one_where_the_snapshot_fills_missing_fields_with_empty_strings() {
        let the_store = InMemoryEntityStore::new();
        the_store
            .seed(
                ContentType::Customer,
                json!({"primaryEmail": "a@x.io"}).as_object().cloned().unwrap(),
            )
            .await;
        the_store
            .seed(
                ContentType::Company,
                json!({"primaryName": "Acme", "code": "K1"}).as_object().cloned().unwrap(),
            )
            .await;

        let the_customers = before_import(&the_store, ContentType::Lead, EmptyValuePolicy::Ignore)
            .await
            .unwrap();
        let the_companies = before_import(&the_store, ContentType::Company, EmptyValuePolicy::Flag)
            .await
            .unwrap();
        let the_products = before_import(&the_store, ContentType::Product, EmptyValuePolicy::Ignore)
            .await
            .unwrap();

        assert!(the_customers.existing_emails.contains("a@x.io"));
        assert!(the_customers.existing_phones.contains(""));
        assert!(the_customers.existing_codes.contains(""));
        assert!(the_customers.existing_names.is_empty());
        assert!(the_companies.existing_names.contains("Acme"));
        assert!(the_companies.existing_codes.contains("K1"));
        assert_eq!(the_companies.policy, EmptyValuePolicy::Flag);
        assert!(the_products.is_empty());
    }
}
