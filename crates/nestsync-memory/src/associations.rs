//! In-memory many-to-many association sets.

use nestsync_core::{AssociationStore, RowId, StoreError};
use std::collections::BTreeMap;

/// Parent id -> associated child ids, in attach order.
#[derive(Debug, Clone, Default)]
pub struct MemoryAssociations {
    links: BTreeMap<RowId, Vec<RowId>>,
}

impl MemoryAssociations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total association rows across all parents.
    pub fn len(&self) -> usize {
        self.links.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AssociationStore for MemoryAssociations {
    fn attach(&mut self, parent_id: RowId, child_id: RowId) -> Result<(), StoreError> {
        let children = self.links.entry(parent_id).or_default();
        if !children.contains(&child_id) {
            children.push(child_id);
        }
        Ok(())
    }

    fn detach_all(&mut self, parent_id: RowId) -> Result<Vec<RowId>, StoreError> {
        Ok(self.links.remove(&parent_id).unwrap_or_default())
    }

    fn associated(&self, parent_id: RowId) -> Result<Vec<RowId>, StoreError> {
        Ok(self.links.get(&parent_id).cloned().unwrap_or_default())
    }
}
