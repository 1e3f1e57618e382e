//! Collaborator contracts: child-row persistence, many-to-many associations,
//! and the startup-time registry that maps entity-type names to them.
//!
//! The core is storage-agnostic. A backend implements [`ChildRepository`]
//! once per entity type and [`AssociationStore`] once per many-to-many
//! relation, then registers both in a [`RepositoryRegistry`].

use crate::error::{RepeaterError, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

/// A flat field map, as submitted by a form or stored on a row.
pub type Fields = Map<String, Value>;

/// Column carrying the soft-delete timestamp.
pub const DELETED_AT: &str = "deleted_at";

/// Column carrying the 1-based display order of a child row.
pub const POSITION: &str = "position";

/// Persisted identifier of a child row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub u64);

impl std::fmt::Display for RowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RowId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl From<RowId> for Value {
    fn from(id: RowId) -> Self {
        Value::from(id.0)
    }
}

/// One persisted child row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildRecord {
    pub id: RowId,
    #[serde(default)]
    pub attributes: Fields,
}

impl ChildRecord {
    pub fn new(id: RowId, attributes: Fields) -> Self {
        Self { id, attributes }
    }

    pub fn is_soft_deleted(&self) -> bool {
        self.attributes
            .get(DELETED_AT)
            .is_some_and(|value| !value.is_null())
    }

    pub fn position(&self) -> Option<u64> {
        self.attributes.get(POSITION).and_then(Value::as_u64)
    }

    /// All attributes, in the shape the form layer re-reads them.
    ///
    /// The row id is included under `id`.
    pub fn attributes_to_array(&self) -> Fields {
        let mut out = Fields::new();
        out.insert("id".to_string(), self.id.into());
        for (key, value) in &self.attributes {
            out.insert(key.clone(), value.clone());
        }
        out
    }
}

/// Per-entity form fields produced by the persistence side.
///
/// Nested repeaters are not part of this struct: the projection engine walks
/// them itself from the repeater catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormFields {
    /// Translated attribute -> per-locale values.
    pub translations: BTreeMap<String, Value>,
    /// Role -> medias, or locale -> (role -> medias) when media fields are
    /// locale-partitioned.
    pub medias: BTreeMap<String, Value>,
    /// Locale -> (role -> files).
    pub files: BTreeMap<String, BTreeMap<String, Value>>,
    /// Browser (reference picker) field -> selected items.
    pub browsers: BTreeMap<String, Value>,
    /// Authoritative attribute dump for repeater rendering. When present it
    /// already excludes translated attributes; when absent projection falls
    /// back to every stored attribute of the row.
    pub repeater_array: Option<Fields>,
}

/// Persistence collaborator for one child entity type.
pub trait ChildRepository {
    /// Entity type this repository stores (e.g. `Image`).
    fn entity_type(&self) -> &str;

    /// Insert a row and return its new identifier.
    fn create(&mut self, fields: Fields) -> Result<RowId, StoreError>;

    /// Overwrite the given fields on an existing row.
    ///
    /// Fails with [`StoreError::NotFound`] when the row does not exist.
    fn update(&mut self, id: RowId, fields: Fields) -> Result<(), StoreError>;

    /// Bulk update every active row matching `conditions` (and `id`, when
    /// given). Returns how many rows were touched.
    fn update_basic(
        &mut self,
        id: Option<RowId>,
        updates: Fields,
        conditions: Fields,
    ) -> Result<usize, StoreError>;

    /// Active (not soft-deleted) rows matching every equality condition, in
    /// persisted relation order.
    fn active_rows(&self, conditions: &Fields) -> Result<Vec<ChildRecord>, StoreError>;

    /// Lookup one row, soft-deleted or not.
    fn row(&self, id: RowId) -> Result<ChildRecord, StoreError>;

    /// Form fields for re-rendering one row.
    fn form_fields(&self, record: &ChildRecord) -> Result<FormFields, StoreError>;
}

/// Association collaborator for one many-to-many relation.
pub trait AssociationStore {
    fn attach(&mut self, parent_id: RowId, child_id: RowId) -> Result<(), StoreError>;

    /// Physically remove every association of `parent_id`, returning the
    /// detached child identifiers.
    fn detach_all(&mut self, parent_id: RowId) -> Result<Vec<RowId>, StoreError>;

    /// Associated child identifiers, in attach order.
    fn associated(&self, parent_id: RowId) -> Result<Vec<RowId>, StoreError>;
}

/// Startup-time registry of collaborators, keyed by entity-type name
/// (repositories) and relation name (associations).
#[derive(Default)]
pub struct RepositoryRegistry {
    repositories: BTreeMap<String, Box<dyn ChildRepository>>,
    associations: BTreeMap<String, Box<dyn AssociationStore>>,
}

impl std::fmt::Debug for RepositoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryRegistry")
            .field("repositories", &self.repositories.keys().collect::<Vec<_>>())
            .field("associations", &self.associations.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a repository under its own entity type.
    ///
    /// Returns the previously registered repository, if any.
    pub fn register(
        &mut self,
        repository: impl ChildRepository + 'static,
    ) -> Option<Box<dyn ChildRepository>> {
        let entity_type = repository.entity_type().to_string();
        self.repositories.insert(entity_type, Box::new(repository))
    }

    /// Register the association store backing a many-to-many relation.
    pub fn register_association(
        &mut self,
        relation: impl Into<String>,
        store: impl AssociationStore + 'static,
    ) -> Option<Box<dyn AssociationStore>> {
        self.associations.insert(relation.into(), Box::new(store))
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.repositories.contains_key(entity_type)
    }

    pub fn repository(&self, entity_type: &str) -> Result<&dyn ChildRepository, RepeaterError> {
        self.repositories
            .get(entity_type)
            .map(|repo| repo.as_ref())
            .ok_or_else(|| unknown_entity(entity_type))
    }

    pub fn repository_mut(
        &mut self,
        entity_type: &str,
    ) -> Result<&mut dyn ChildRepository, RepeaterError> {
        match self.repositories.get_mut(entity_type) {
            Some(repo) => Ok(repo.as_mut()),
            None => Err(unknown_entity(entity_type)),
        }
    }

    pub fn association(&self, relation: &str) -> Result<&dyn AssociationStore, RepeaterError> {
        self.associations
            .get(relation)
            .map(|store| store.as_ref())
            .ok_or_else(|| unknown_association(relation))
    }

    pub fn association_mut(
        &mut self,
        relation: &str,
    ) -> Result<&mut dyn AssociationStore, RepeaterError> {
        match self.associations.get_mut(relation) {
            Some(store) => Ok(store.as_mut()),
            None => Err(unknown_association(relation)),
        }
    }

    /// Registered entity types in deterministic order.
    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.repositories.keys().map(String::as_str)
    }
}

fn unknown_entity(entity_type: &str) -> RepeaterError {
    RepeaterError::configuration(format!(
        "no repository registered for entity type `{entity_type}`"
    ))
}

fn unknown_association(relation: &str) -> RepeaterError {
    RepeaterError::configuration(format!(
        "no association store registered for relation `{relation}`"
    ))
}
