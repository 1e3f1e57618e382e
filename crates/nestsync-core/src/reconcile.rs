//! Reconciliation engine: drive persisted child rows to match a submission.
//!
//! For owned relations (plain foreign key, or polymorphic morph pair) each
//! submitted item either updates the row its relation-prefixed client id
//! names, or creates a new row owned by the parent. Rows owned by the parent
//! but absent from the submission are soft-deleted once every item has been
//! written. Many-to-many relations are simpler: children are always created
//! fresh and attached, optionally after detaching the previous set.
//!
//! ```text
//! submission ─► items (position = index + 1)
//!                 │ client id not relation-prefixed? try SessionRegistry
//!                 │ no languages? derive from parent locale flags
//!                 ├─ "<relation>-<id>"  → update(id)
//!                 └─ otherwise          → create(+ owner columns), register token
//!               nested repeaters of the child (same SessionRegistry)
//! then: active rows of the parent ∖ current ids → soft delete
//! ```
//!
//! Persistence failures propagate unchanged; the caller owns the transaction.

use crate::config::{RepeaterCatalog, RepeaterDef};
use crate::descriptor::{ParentRef, RelationKind, RepeaterDescriptor};
use crate::error::{RepeaterError, StoreError};
use crate::payload::{REPEATERS_KEY, SubmittedItem, submitted_items};
use crate::persistence::{DELETED_AT, Fields, RepositoryRegistry, RowId};
use crate::registry::SessionRegistry;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

/// What one reconciliation call did to one relation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub repeater: String,
    pub relation: String,
    /// Child ids associated with the parent after reconciliation, in
    /// submission order.
    pub current_ids: Vec<RowId>,
    pub created: Vec<RowId>,
    pub updated: Vec<RowId>,
    pub soft_deleted: Vec<RowId>,
    /// Many-to-many associations removed before re-attaching.
    pub detached: Vec<RowId>,
}

impl ReconcileOutcome {
    fn for_descriptor(descriptor: &RepeaterDescriptor) -> Self {
        Self {
            repeater: descriptor.name.clone(),
            relation: descriptor.relation_name.clone(),
            ..Self::default()
        }
    }
}

/// Columns identifying the rows a parent owns through `kind`.
///
/// Many-to-many relations own nothing through columns and yield `None`.
pub fn owner_scope(
    parent: &ParentRef,
    descriptor: &RepeaterDescriptor,
    kind: &RelationKind,
) -> Option<Fields> {
    let mut scope = Fields::new();
    match kind {
        RelationKind::Plain => {
            scope.insert(parent.foreign_key.clone(), parent.id.into());
        }
        RelationKind::Polymorphic { morph } => {
            let morph = morph.as_deref().unwrap_or(&descriptor.relation_name);
            scope.insert(
                format!("{morph}_type"),
                Value::String(parent.entity_type.clone()),
            );
            scope.insert(format!("{morph}_id"), parent.id.into());
        }
        RelationKind::ManyToMany { .. } => return None,
    }
    Some(scope)
}

fn deletion_marker() -> Fields {
    let mut updates = Fields::new();
    updates.insert(
        DELETED_AT.to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    updates
}

/// Request-scoped reconciliation driver.
///
/// Borrows the collaborators for one submission; the same
/// [`SessionRegistry`] is threaded through every nested call.
pub struct Reconciler<'a> {
    repositories: &'a mut RepositoryRegistry,
    catalog: &'a RepeaterCatalog,
    session: &'a SessionRegistry,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        repositories: &'a mut RepositoryRegistry,
        catalog: &'a RepeaterCatalog,
        session: &'a SessionRegistry,
    ) -> Self {
        Self {
            repositories,
            catalog,
            session,
        }
    }

    /// Reconcile every repeater declared for the parent's entity type, in
    /// declaration order.
    pub fn reconcile_all(
        &mut self,
        parent: &ParentRef,
        fields: &Fields,
    ) -> Result<Vec<ReconcileOutcome>, RepeaterError> {
        let catalog = self.catalog;
        catalog
            .repeaters_of(&parent.entity_type)
            .iter()
            .map(|repeater| self.reconcile(parent, fields, repeater))
            .collect()
    }

    /// Reconcile one relation of `parent` against `fields["repeaters"][name]`.
    pub fn reconcile(
        &mut self,
        parent: &ParentRef,
        fields: &Fields,
        repeater: &RepeaterDef,
    ) -> Result<ReconcileOutcome, RepeaterError> {
        let descriptor = &repeater.descriptor;
        let items = submitted_items(fields, &descriptor.name)?;

        let outcome = match (&repeater.kind, owner_scope(parent, descriptor, &repeater.kind)) {
            (RelationKind::ManyToMany { keep_existing }, _) => {
                self.reconcile_many(parent, descriptor, items, *keep_existing)?
            }
            (_, Some(scope)) => self.reconcile_owned(fields, descriptor, scope, items)?,
            (_, None) => {
                return Err(RepeaterError::configuration(format!(
                    "relation `{}` has no owner scope",
                    descriptor.relation_name
                )));
            }
        };

        tracing::info!(
            session = %self.session.session_id(),
            parent = %parent.id,
            repeater = %descriptor.name,
            relation = %descriptor.relation_name,
            created = outcome.created.len(),
            updated = outcome.updated.len(),
            soft_deleted = outcome.soft_deleted.len(),
            detached = outcome.detached.len(),
            "reconciled repeater"
        );
        Ok(outcome)
    }

    fn reconcile_owned(
        &mut self,
        parent_fields: &Fields,
        descriptor: &RepeaterDescriptor,
        scope: Fields,
        items: Vec<SubmittedItem>,
    ) -> Result<ReconcileOutcome, RepeaterError> {
        let entity_type = descriptor.target_entity_type.as_str();
        let mut outcome = ReconcileOutcome::for_descriptor(descriptor);

        if items.is_empty() {
            let repository = self.repositories.repository_mut(entity_type)?;
            let owned = repository.active_rows(&scope)?;
            repository.update_basic(None, deletion_marker(), scope)?;
            outcome.soft_deleted = owned.into_iter().map(|row| row.id).collect();
            return Ok(outcome);
        }

        for mut item in items {
            self.resolve_client_id(descriptor, &mut item);
            item.derive_languages(parent_fields);

            let existing = item
                .client_id
                .as_deref()
                .and_then(|client_id| descriptor.existing_row_id(client_id));
            let row_id = match existing {
                Some(Ok(id)) => {
                    self.repositories
                        .repository_mut(entity_type)?
                        .update(id, item.fields.clone())?;
                    tracing::debug!(
                        session = %self.session.session_id(),
                        relation = %descriptor.relation_name,
                        id = %id,
                        position = item.position,
                        "updated repeater row"
                    );
                    outcome.updated.push(id);
                    id
                }
                Some(Err(_)) => {
                    let client_id = item.client_id.unwrap_or_default();
                    return Err(StoreError::not_found(entity_type, client_id).into());
                }
                None => {
                    let mut create_fields = item.fields.clone();
                    for (column, value) in &scope {
                        create_fields.insert(column.clone(), value.clone());
                    }
                    let id = self
                        .repositories
                        .repository_mut(entity_type)?
                        .create(create_fields)?;
                    tracing::debug!(
                        session = %self.session.session_id(),
                        relation = %descriptor.relation_name,
                        id = %id,
                        position = item.position,
                        "created repeater row"
                    );
                    if let Some(token) = &item.client_id {
                        self.session.register(token.clone(), id);
                    }
                    outcome.created.push(id);
                    id
                }
            };
            outcome.current_ids.push(row_id);

            self.reconcile_nested(entity_type, row_id, &item)?;
        }

        let repository = self.repositories.repository_mut(entity_type)?;
        let stale: Vec<RowId> = repository
            .active_rows(&scope)?
            .into_iter()
            .map(|row| row.id)
            .filter(|id| !outcome.current_ids.contains(id))
            .collect();
        for id in &stale {
            repository.update_basic(Some(*id), deletion_marker(), Fields::new())?;
        }
        outcome.soft_deleted = stale;

        Ok(outcome)
    }

    // Many-to-many children have no update-in-place path: every submitted item
    // becomes a fresh row.
    fn reconcile_many(
        &mut self,
        parent: &ParentRef,
        descriptor: &RepeaterDescriptor,
        items: Vec<SubmittedItem>,
        keep_existing: bool,
    ) -> Result<ReconcileOutcome, RepeaterError> {
        let entity_type = descriptor.target_entity_type.as_str();
        let relation = descriptor.relation_name.as_str();
        let mut outcome = ReconcileOutcome::for_descriptor(descriptor);

        if !keep_existing {
            outcome.detached = self
                .repositories
                .association_mut(relation)?
                .detach_all(parent.id)?;
        }

        for item in items {
            let id = self
                .repositories
                .repository_mut(entity_type)?
                .create(item.fields.clone())?;
            self.repositories
                .association_mut(relation)?
                .attach(parent.id, id)?;
            tracing::debug!(
                session = %self.session.session_id(),
                relation = %relation,
                id = %id,
                "created and attached repeater row"
            );
            outcome.created.push(id);
            outcome.current_ids.push(id);

            self.reconcile_nested(entity_type, id, &item)?;
        }

        Ok(outcome)
    }

    fn resolve_client_id(&self, descriptor: &RepeaterDescriptor, item: &mut SubmittedItem) {
        let Some(client_id) = item.client_id.as_deref() else {
            return;
        };
        if descriptor.existing_row_id(client_id).is_some() {
            return;
        }
        if let Some(id) = self.session.resolve(client_id) {
            tracing::debug!(
                session = %self.session.session_id(),
                token = %client_id,
                id = %id,
                "resolved temporary token"
            );
            item.client_id = Some(descriptor.client_id_for(id));
        }
    }

    /// Reconcile the repeaters declared on the child's own entity type, with
    /// the child as parent.
    fn reconcile_nested(
        &mut self,
        entity_type: &str,
        id: RowId,
        item: &SubmittedItem,
    ) -> Result<(), RepeaterError> {
        let catalog = self.catalog;
        let repeaters = catalog.repeaters_of(entity_type);
        if repeaters.is_empty() {
            if item.nested.is_some() {
                tracing::warn!(
                    entity_type = %entity_type,
                    id = %id,
                    "nested repeaters submitted for an entity type that declares none"
                );
            }
            return Ok(());
        }

        let mut nested_fields = item.fields.clone();
        nested_fields.insert(
            REPEATERS_KEY.to_string(),
            Value::Object(item.nested.clone().unwrap_or_default()),
        );
        let child = ParentRef::new(entity_type, id);
        for repeater in repeaters {
            self.reconcile(&child, &nested_fields, repeater)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{RepeaterOverrides, resolve};
    use serde_json::json;

    #[test]
    fn plain_scope_uses_parent_foreign_key() {
        let parent = ParentRef::new("Article", RowId(5));
        let descriptor = resolve("images", &RepeaterOverrides::default());
        let scope = owner_scope(&parent, &descriptor, &RelationKind::Plain).expect("plain scope");
        assert_eq!(Value::Object(scope), json!({ "article_id": 5 }));
    }

    #[test]
    fn polymorphic_scope_defaults_morph_to_relation() {
        let parent = ParentRef::new("Article", RowId(5));
        let descriptor = resolve("comments", &RepeaterOverrides::default());
        let scope = owner_scope(
            &parent,
            &descriptor,
            &RelationKind::Polymorphic { morph: None },
        )
        .expect("morph scope");
        assert_eq!(
            Value::Object(scope),
            json!({ "comments_type": "Article", "comments_id": 5 })
        );

        let scope = owner_scope(
            &parent,
            &descriptor,
            &RelationKind::Polymorphic {
                morph: Some("commentable".to_string()),
            },
        )
        .expect("morph scope");
        assert_eq!(
            Value::Object(scope),
            json!({ "commentable_type": "Article", "commentable_id": 5 })
        );
    }

    #[test]
    fn many_to_many_has_no_owner_scope() {
        let parent = ParentRef::new("Article", RowId(5));
        let descriptor = resolve("tags", &RepeaterOverrides::default());
        assert!(
            owner_scope(
                &parent,
                &descriptor,
                &RelationKind::ManyToMany {
                    keep_existing: true
                }
            )
            .is_none()
        );
    }

    #[test]
    fn deletion_marker_sets_a_timestamp() {
        let marker = deletion_marker();
        let stamp = marker
            .get(DELETED_AT)
            .and_then(Value::as_str)
            .expect("deleted_at must be a string");
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    }
}
