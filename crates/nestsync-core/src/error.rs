//! Error types for repeater reconciliation and projection.

/// Failures reported by a persistence collaborator.
///
/// The core never inspects or retries these; they travel to the caller
/// unchanged so the surrounding request transaction can roll back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// An update or lookup targeted a row that does not exist.
    #[error("{entity_type} row not found: {id}")]
    NotFound { entity_type: String, id: String },

    /// The store rejected the submitted field map (constraint violation).
    #[error("validation failed for {entity_type}: {message}")]
    Validation {
        entity_type: String,
        message: String,
    },

    /// Any other backend failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(entity_type: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        }
    }
}

/// Errors surfaced by the reconciliation and projection engines.
#[derive(Debug, thiserror::Error)]
pub enum RepeaterError {
    /// A repeater resolves to an entity type, relation or block that is not
    /// registered, or the submitted payload has the wrong shape.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RepeaterError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether this error is a persistence `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(StoreError::NotFound { .. }))
    }
}
