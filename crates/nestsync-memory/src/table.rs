//! In-memory child-row table with soft-delete semantics.
//!
//! One `MemoryTable` backs one entity type. Rows are never physically removed:
//! soft-deleted rows keep a non-null `deleted_at` and disappear from every
//! "active" query, the same way a default soft-delete scope would hide them.

use crate::jsonl::{JsonlError, read_rows_from_path, write_rows_to_path};
use nestsync_core::{ChildRecord, ChildRepository, Fields, FormFields, RowId, StoreError};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

const MEDIAS: &str = "medias";
const FILES: &str = "files";
const BROWSERS: &str = "browsers";

/// Rows of one entity type.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    entity_type: String,
    rows: BTreeMap<RowId, ChildRecord>,
    /// `None` once the id space is exhausted.
    next_id: Option<u64>,
    translated: BTreeSet<String>,
    required: BTreeSet<String>,
    repeater_array: bool,
}

impl MemoryTable {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            rows: BTreeMap::new(),
            next_id: Some(1),
            translated: BTreeSet::new(),
            required: BTreeSet::new(),
            repeater_array: false,
        }
    }

    /// Build a table from fully-materialized rows.
    ///
    /// Duplicate ids are resolved last-write-wins; new ids continue after the
    /// highest existing one.
    pub fn from_rows(entity_type: impl Into<String>, rows: Vec<ChildRecord>) -> Self {
        let mut table = Self::new(entity_type);
        for row in rows {
            table.insert_row(row);
        }
        table
    }

    /// Load table state from a JSONL snapshot.
    pub fn load_jsonl(
        entity_type: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<Self, JsonlError> {
        Ok(Self::from_rows(entity_type, read_rows_from_path(path)?))
    }

    /// Persist table state to a JSONL snapshot.
    pub fn save_jsonl(&self, path: impl AsRef<Path>) -> Result<(), JsonlError> {
        let rows: Vec<ChildRecord> = self.rows.values().cloned().collect();
        write_rows_to_path(path, &rows)
    }

    /// Attributes exposed as translations in form fields.
    pub fn with_translated<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.translated.extend(attributes.into_iter().map(Into::into));
        self
    }

    /// Columns that must be present and non-null on create.
    pub fn with_required<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Produce an authoritative repeater attribute dump in form fields,
    /// excluding translated, media, file and browser attributes.
    pub fn with_repeater_array(mut self) -> Self {
        self.repeater_array = true;
        self
    }

    /// Insert or replace a row by id. Returns the previous row, if any.
    pub fn insert_row(&mut self, row: ChildRecord) -> Option<ChildRecord> {
        self.next_id = match (self.next_id, row.id.0.checked_add(1)) {
            (Some(next), Some(after)) => Some(next.max(after)),
            _ => None,
        };
        self.rows.insert(row.id, row)
    }

    /// Total rows, soft-deleted included.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate all rows in id order, soft-deleted included.
    pub fn rows(&self) -> impl Iterator<Item = &ChildRecord> {
        self.rows.values()
    }

    fn matches(row: &ChildRecord, conditions: &Fields) -> bool {
        conditions.iter().all(|(column, expected)| {
            if column == "id" {
                return expected.as_u64() == Some(row.id.0);
            }
            row.attributes.get(column).unwrap_or(&Value::Null) == expected
        })
    }

    fn validate(&self, fields: &Fields) -> Result<(), StoreError> {
        let missing: Vec<&str> = self
            .required
            .iter()
            .filter(|column| fields.get(*column).is_none_or(Value::is_null))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Validation {
                entity_type: self.entity_type.clone(),
                message: format!("missing required column(s): {}", missing.join(", ")),
            })
        }
    }

    fn object_map(record: &ChildRecord, key: &str) -> BTreeMap<String, Value> {
        match record.attributes.get(key) {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            _ => BTreeMap::new(),
        }
    }
}

impl ChildRepository for MemoryTable {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn create(&mut self, mut fields: Fields) -> Result<RowId, StoreError> {
        fields.remove("id");
        self.validate(&fields)?;
        let Some(next) = self.next_id else {
            return Err(StoreError::Backend(format!(
                "{}: row id space exhausted",
                self.entity_type
            )));
        };
        let id = RowId(next);
        self.next_id = next.checked_add(1);
        self.rows.insert(id, ChildRecord::new(id, fields));
        tracing::trace!(entity_type = %self.entity_type, id = %id, "memory row created");
        Ok(id)
    }

    fn update(&mut self, id: RowId, mut fields: Fields) -> Result<(), StoreError> {
        fields.remove("id");
        let row = self
            .rows
            .get_mut(&id)
            .filter(|row| !row.is_soft_deleted())
            .ok_or_else(|| StoreError::not_found(&self.entity_type, id))?;
        row.attributes.extend(fields);
        Ok(())
    }

    fn update_basic(
        &mut self,
        id: Option<RowId>,
        updates: Fields,
        conditions: Fields,
    ) -> Result<usize, StoreError> {
        let mut touched = 0;
        for row in self.rows.values_mut() {
            if row.is_soft_deleted() || id.is_some_and(|id| id != row.id) {
                continue;
            }
            if !Self::matches(row, &conditions) {
                continue;
            }
            for (column, value) in &updates {
                row.attributes.insert(column.clone(), value.clone());
            }
            touched += 1;
        }
        Ok(touched)
    }

    fn active_rows(&self, conditions: &Fields) -> Result<Vec<ChildRecord>, StoreError> {
        let mut rows: Vec<ChildRecord> = self
            .rows
            .values()
            .filter(|row| !row.is_soft_deleted() && Self::matches(row, conditions))
            .cloned()
            .collect();
        rows.sort_by_key(|row| (row.position().unwrap_or(u64::MAX), row.id));
        Ok(rows)
    }

    fn row(&self, id: RowId) -> Result<ChildRecord, StoreError> {
        self.rows
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(&self.entity_type, id))
    }

    fn form_fields(&self, record: &ChildRecord) -> Result<FormFields, StoreError> {
        let translations: BTreeMap<String, Value> = record
            .attributes
            .iter()
            .filter(|(key, _)| self.translated.contains(key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let files: BTreeMap<String, BTreeMap<String, Value>> = Self::object_map(record, FILES)
            .into_iter()
            .filter_map(|(locale, roles)| match roles {
                Value::Object(roles) => Some((locale, roles.into_iter().collect::<BTreeMap<_, _>>())),
                _ => None,
            })
            .collect();

        let repeater_array = self.repeater_array.then(|| {
            record
                .attributes_to_array()
                .into_iter()
                .filter(|(key, _)| {
                    !self.translated.contains(key.as_str())
                        && ![MEDIAS, FILES, BROWSERS].contains(&key.as_str())
                })
                .collect::<Fields>()
        });

        Ok(FormFields {
            translations,
            medias: Self::object_map(record, MEDIAS),
            files,
            browsers: Self::object_map(record, BROWSERS),
            repeater_array,
        })
    }
}
