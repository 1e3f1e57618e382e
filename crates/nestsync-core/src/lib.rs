//! # nestsync-core
//!
//! Reconciliation of nested "repeater" form payloads against persisted child
//! rows, and the inverse projection back into form fields.
//!
//! This crate is **storage-agnostic**: rows are reached only through the
//! collaborator traits in [`persistence`]. It owns the protocol, not the
//! database.
//!
//! ## Architecture
//!
//! ```text
//! SessionRegistry       ← client token → persisted id, per editing session
//!     │
//! descriptor            ← repeater name → relation, entity type, kind
//!     │
//! Reconciler            ← submission → create / update / soft delete
//!     │
//! Projector / FieldSet  ← persisted rows → composite-keyed form fields
//! ```

pub mod config;
pub mod descriptor;
pub mod error;
pub mod keys;
pub mod payload;
pub mod persistence;
pub mod project;
pub mod reconcile;
pub mod registry;

pub use config::{
    BlockMetadata, ConfigError, MetadataLookup, RepeaterCatalog, RepeaterConfig, RepeaterDecl,
    RepeaterDef,
};
pub use descriptor::{ParentRef, RelationKind, RepeaterDescriptor, RepeaterOverrides};
pub use error::{RepeaterError, StoreError};
pub use keys::{CompositeKey, group_block_fields};
pub use payload::{SubmittedItem, submitted_items};
pub use persistence::{
    AssociationStore, ChildRecord, ChildRepository, DELETED_AT, Fields, FormFields, POSITION,
    RepositoryRegistry, RowId,
};
pub use project::{
    ChildProjection, FieldEntry, FieldSet, MediaSlots, Projector, RepeaterEntry,
    RepeaterProjection,
};
pub use reconcile::{ReconcileOutcome, Reconciler};
pub use registry::{Registration, SessionRegistry};
