//! Projection engine: persisted repeater rows back into form fields.
//!
//! Projection first builds a tree: one [`RepeaterProjection`] per relation,
//! holding a [`ChildProjection`] per persisted row, each of which holds the
//! projections of the row's own repeaters. Only [`FieldSet::merge`] turns the
//! tree into the flat, composite-keyed shape the form layer consumes:
//!
//! ```text
//! repeaters["images"]                 = [{ id: "images-9", type, title, .. }]
//! repeaters["blocks-images-9_tags"]   = [{ id: "tags-4", .. }]
//! repeaterFields["images"]            = [{ name: "blocks[images-9][caption]", value }
//!                                        { name: "blocks[tags-4][label]", value }]
//! repeaterMedias / repeaterFiles / repeaterBrowsers["images"] = { "<composite key>": value }
//! ```

use crate::config::{BlockMetadata, MetadataLookup, RepeaterCatalog, RepeaterDef};
use crate::descriptor::{ParentRef, RelationKind};
use crate::error::RepeaterError;
use crate::keys;
use crate::persistence::{ChildRecord, ChildRepository, Fields, RepositoryRegistry, RowId};
use crate::reconcile::owner_scope;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// One entry of a repeater list, as the form renders it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeaterEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub component: String,
    pub title: String,
    pub title_field: Option<String>,
    pub hide_title_prefix: bool,
}

/// One named form field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldEntry {
    pub name: String,
    pub value: Value,
}

/// Media slots of one row.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSlots {
    /// role -> medias
    ByRole(BTreeMap<String, Value>),
    /// locale -> role -> medias
    ByLocale(BTreeMap<String, BTreeMap<String, Value>>),
}

impl Default for MediaSlots {
    fn default() -> Self {
        Self::ByRole(BTreeMap::new())
    }
}

/// Projection of one persisted child row.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildProjection {
    pub id: RowId,
    pub entry: RepeaterEntry,
    pub translations: BTreeMap<String, Value>,
    pub medias: MediaSlots,
    pub files: BTreeMap<String, BTreeMap<String, Value>>,
    pub browsers: BTreeMap<String, Value>,
    /// Plain attributes, translated ones excluded.
    pub attributes: Fields,
    pub nested: Vec<RepeaterProjection>,
}

/// Projection of one relation of one parent.
#[derive(Debug, Clone, PartialEq)]
pub struct RepeaterProjection {
    pub name: String,
    pub relation: String,
    pub children: Vec<ChildProjection>,
}

/// Flat accumulators of one repeater projection, nested levels included.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Flattened {
    /// Repeater lists keyed by repeater name or nested composite key. The
    /// projection's own list comes first.
    pub lists: Vec<(String, Vec<RepeaterEntry>)>,
    pub fields: Vec<FieldEntry>,
    pub medias: BTreeMap<String, Value>,
    pub files: BTreeMap<String, Value>,
    pub browsers: BTreeMap<String, Value>,
}

impl RepeaterProjection {
    pub fn flatten(&self) -> Flattened {
        let relation = self.relation.as_str();
        let mut out = Flattened::default();
        let mut entries = Vec::with_capacity(self.children.len());
        let mut nested_lists = Vec::new();

        for child in &self.children {
            entries.push(child.entry.clone());

            for (attribute, value) in &child.translations {
                out.fields.push(FieldEntry {
                    name: keys::field_name(relation, child.id, attribute),
                    value: value.clone(),
                });
            }

            match &child.medias {
                MediaSlots::ByRole(roles) => {
                    for (role, medias) in roles {
                        out.medias
                            .insert(keys::field_name(relation, child.id, role), medias.clone());
                    }
                }
                MediaSlots::ByLocale(locales) => {
                    for (locale, roles) in locales {
                        for (role, medias) in roles {
                            out.medias.insert(
                                keys::localized_field_name(relation, child.id, role, locale),
                                medias.clone(),
                            );
                        }
                    }
                }
            }

            for (locale, roles) in &child.files {
                for (role, files) in roles {
                    out.files.insert(
                        keys::localized_field_name(relation, child.id, role, locale),
                        files.clone(),
                    );
                }
            }

            for (field, value) in &child.browsers {
                out.browsers
                    .insert(keys::field_name(relation, child.id, field), value.clone());
            }

            for (attribute, value) in &child.attributes {
                out.fields.push(FieldEntry {
                    name: keys::field_name(relation, child.id, attribute),
                    value: value.clone(),
                });
            }

            let prefix = keys::nested_prefix(relation, child.id);
            for nested in &child.nested {
                let inner = nested.flatten();
                for (key, list) in inner.lists {
                    nested_lists.push((format!("{prefix}{key}"), list));
                }
                out.fields.extend(inner.fields);
                out.medias.extend(inner.medias);
                out.files.extend(inner.files);
                out.browsers.extend(inner.browsers);
            }
        }

        out.lists.push((self.name.clone(), entries));
        out.lists.extend(nested_lists);
        out
    }
}

/// The form-ready field set several repeaters contribute to.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSet {
    pub repeaters: BTreeMap<String, Vec<RepeaterEntry>>,
    pub repeater_fields: BTreeMap<String, Vec<FieldEntry>>,
    pub repeater_medias: BTreeMap<String, BTreeMap<String, Value>>,
    pub repeater_files: BTreeMap<String, BTreeMap<String, Value>>,
    pub repeater_browsers: BTreeMap<String, BTreeMap<String, Value>>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one repeater projection, keyed by its repeater name.
    ///
    /// Other repeaters already in the set are left untouched.
    pub fn merge(&mut self, projection: &RepeaterProjection) {
        let flat = projection.flatten();
        for (key, list) in flat.lists {
            self.repeaters.insert(key, list);
        }
        let name = projection.name.clone();
        self.repeater_fields.insert(name.clone(), flat.fields);
        self.repeater_medias.insert(name.clone(), flat.medias);
        self.repeater_files.insert(name.clone(), flat.files);
        self.repeater_browsers.insert(name, flat.browsers);
    }

    /// Every field of one repeater as a flat `name -> value` map.
    pub fn flat_fields(&self, repeater_name: &str) -> Fields {
        self.repeater_fields
            .get(repeater_name)
            .into_iter()
            .flatten()
            .map(|field| (field.name.clone(), field.value.clone()))
            .collect()
    }
}

/// Read-only projection driver.
pub struct Projector<'a> {
    repositories: &'a RepositoryRegistry,
    catalog: &'a RepeaterCatalog,
    metadata: &'a dyn MetadataLookup,
}

impl<'a> Projector<'a> {
    /// Projector reading block metadata from the catalog itself.
    pub fn new(repositories: &'a RepositoryRegistry, catalog: &'a RepeaterCatalog) -> Self {
        Self {
            repositories,
            catalog,
            metadata: catalog,
        }
    }

    pub fn with_metadata(mut self, metadata: &'a dyn MetadataLookup) -> Self {
        self.metadata = metadata;
        self
    }

    /// Project every repeater declared for the parent's entity type into
    /// `fieldset`.
    pub fn project_all(
        &self,
        parent: &ParentRef,
        fieldset: &mut FieldSet,
    ) -> Result<(), RepeaterError> {
        for repeater in self.catalog.repeaters_of(&parent.entity_type) {
            self.project_into(fieldset, parent, repeater)?;
        }
        Ok(())
    }

    /// Project one relation and merge it into `fieldset`.
    pub fn project_into(
        &self,
        fieldset: &mut FieldSet,
        parent: &ParentRef,
        repeater: &RepeaterDef,
    ) -> Result<(), RepeaterError> {
        let projection = self.project(parent, repeater)?;
        fieldset.merge(&projection);
        Ok(())
    }

    /// Build the projection tree for one relation of `parent`.
    pub fn project(
        &self,
        parent: &ParentRef,
        repeater: &RepeaterDef,
    ) -> Result<RepeaterProjection, RepeaterError> {
        let descriptor = &repeater.descriptor;
        let entity_type = descriptor.target_entity_type.as_str();
        let repository = self.repositories.repository(entity_type)?;
        let metadata = self.block_metadata(&descriptor.name, entity_type)?;

        let rows = self.children_of(repository, parent, repeater)?;
        let mut children = Vec::with_capacity(rows.len());
        for record in rows {
            children.push(self.project_child(repository, repeater, metadata, record)?);
        }

        Ok(RepeaterProjection {
            name: descriptor.name.clone(),
            relation: descriptor.relation_name.clone(),
            children,
        })
    }

    fn block_metadata(
        &self,
        repeater_name: &str,
        entity_type: &str,
    ) -> Result<&'a BlockMetadata, RepeaterError> {
        self.metadata
            .lookup(repeater_name)
            .or_else(|| self.metadata.lookup(entity_type))
            .ok_or_else(|| {
                RepeaterError::configuration(format!(
                    "no block metadata for repeater `{repeater_name}` or entity type `{entity_type}`"
                ))
            })
    }

    fn children_of(
        &self,
        repository: &dyn ChildRepository,
        parent: &ParentRef,
        repeater: &RepeaterDef,
    ) -> Result<Vec<ChildRecord>, RepeaterError> {
        if let RelationKind::ManyToMany { .. } = repeater.kind {
            let associated = self
                .repositories
                .association(&repeater.descriptor.relation_name)?
                .associated(parent.id)?;
            let mut rows = Vec::with_capacity(associated.len());
            for id in associated {
                let record = repository.row(id)?;
                if !record.is_soft_deleted() {
                    rows.push(record);
                }
            }
            return Ok(rows);
        }

        match owner_scope(parent, &repeater.descriptor, &repeater.kind) {
            Some(scope) => Ok(repository.active_rows(&scope)?),
            None => Ok(Vec::new()),
        }
    }

    fn project_child(
        &self,
        repository: &dyn ChildRepository,
        repeater: &RepeaterDef,
        metadata: &BlockMetadata,
        record: ChildRecord,
    ) -> Result<ChildProjection, RepeaterError> {
        let descriptor = &repeater.descriptor;
        let form = repository.form_fields(&record)?;

        let attributes = match form.repeater_array {
            Some(array) => array,
            None => {
                let translated: BTreeSet<&str> =
                    form.translations.keys().map(String::as_str).collect();
                record
                    .attributes_to_array()
                    .into_iter()
                    .filter(|(key, _)| !translated.contains(key.as_str()))
                    .collect()
            }
        };

        let medias = if self.catalog.media_partitioned() {
            MediaSlots::ByLocale(partition_by_locale(&form.medias, record.id))
        } else {
            MediaSlots::ByRole(form.medias)
        };

        let entity_type = descriptor.target_entity_type.as_str();
        let as_parent = ParentRef::new(entity_type, record.id);
        let mut nested = Vec::new();
        for nested_repeater in self.catalog.repeaters_of(entity_type) {
            nested.push(self.project(&as_parent, nested_repeater)?);
        }

        Ok(ChildProjection {
            id: record.id,
            entry: RepeaterEntry {
                id: keys::block_id(&descriptor.relation_name, record.id),
                component: metadata.component.clone(),
                title: metadata.title.clone(),
                title_field: metadata.title_field.clone(),
                hide_title_prefix: metadata.hide_title_prefix,
            },
            translations: form.translations,
            medias,
            files: form.files,
            browsers: form.browsers,
            attributes,
            nested,
        })
    }
}

fn partition_by_locale(
    medias: &BTreeMap<String, Value>,
    id: RowId,
) -> BTreeMap<String, BTreeMap<String, Value>> {
    let mut out = BTreeMap::new();
    for (locale, roles) in medias {
        match roles {
            Value::Object(roles) => {
                let roles = roles
                    .iter()
                    .map(|(role, value)| (role.clone(), value.clone()))
                    .collect();
                out.insert(locale.clone(), roles);
            }
            other => tracing::warn!(
                id = %id,
                locale = %locale,
                value = %other,
                "skipping locale-partitioned media entry that is not a role map"
            ),
        }
    }
    out
}
