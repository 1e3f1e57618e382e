//! Session identifier registry: client temporary tokens -> persisted ids.
//!
//! A form can reference a row it has not created yet (a sibling added earlier
//! in the same submission, or a parent whose nested repeaters are reconciled
//! later in the same request chain). The reconciliation engine registers every
//! row it creates under the client token it was submitted with, so later
//! lookups can rewrite that token into the persisted identifier.
//!
//! One registry lives for one editing session and is passed explicitly to
//! every reconciliation call made on behalf of that session.

use crate::persistence::RowId;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// What a call to [`SessionRegistry::register`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The token was new and now maps to the given id.
    Inserted,
    /// The token already mapped to the same id.
    Unchanged,
    /// The token already mapped to a different id; the existing mapping was
    /// kept.
    Conflict { existing: RowId },
}

/// Write-once token map scoped to one editing session.
///
/// Reads and writes go through an internal mutex so concurrent submissions on
/// the same session serialize instead of losing registrations. Lookups never
/// wait on anything but that lock and never create entries.
#[derive(Debug)]
pub struct SessionRegistry {
    session_id: Uuid,
    entries: Mutex<BTreeMap<String, RowId>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_session_id(Uuid::new_v4())
    }

    pub fn with_session_id(session_id: Uuid) -> Self {
        Self {
            session_id,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Record that `token` now refers to `persisted_id`.
    ///
    /// Entries are write-once. Registering the same pair twice is a no-op;
    /// registering a known token with a different id is a usage error: the
    /// first id is kept and the conflict is logged and reported.
    pub fn register(&self, token: impl Into<String>, persisted_id: RowId) -> Registration {
        let token = token.into();
        let mut entries = self.lock();
        match entries.get(&token) {
            Some(existing) if *existing == persisted_id => Registration::Unchanged,
            Some(existing) => {
                tracing::warn!(
                    session = %self.session_id,
                    token = %token,
                    existing = %existing,
                    rejected = %persisted_id,
                    "temporary token already registered to a different row"
                );
                Registration::Conflict {
                    existing: *existing,
                }
            }
            None => {
                tracing::debug!(
                    session = %self.session_id,
                    token = %token,
                    id = %persisted_id,
                    "registered temporary token"
                );
                entries.insert(token, persisted_id);
                Registration::Inserted
            }
        }
    }

    /// Persisted id for `token`, if this session created one.
    ///
    /// Absence is the normal outcome for tokens minted outside this flow.
    pub fn resolve(&self, token: &str) -> Option<RowId> {
        self.lock().get(token).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A poisoned lock still holds a consistent map: every mutation is a single
    // insert.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, RowId>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn registered_token_round_trips() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.register("tmp-1", RowId(57)), Registration::Inserted);
        assert_eq!(registry.resolve("tmp-1"), Some(RowId(57)));
    }

    #[test]
    fn unknown_token_is_absent_not_an_error() {
        let registry = SessionRegistry::new();
        registry.register("tmp-1", RowId(57));
        assert_eq!(registry.resolve("tmp-2"), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn same_pair_twice_is_idempotent() {
        let registry = SessionRegistry::new();
        registry.register("tmp-1", RowId(57));
        assert_eq!(registry.register("tmp-1", RowId(57)), Registration::Unchanged);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn conflicting_registration_keeps_first_id() {
        let registry = SessionRegistry::new();
        registry.register("tmp-1", RowId(57));
        assert_eq!(
            registry.register("tmp-1", RowId(99)),
            Registration::Conflict {
                existing: RowId(57)
            }
        );
        assert_eq!(registry.resolve("tmp-1"), Some(RowId(57)));
    }

    #[test]
    fn concurrent_registrations_are_not_lost() {
        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..8u64)
            .map(|n| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    registry.register(format!("tmp-{n}"), RowId(n + 100));
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("registration thread should finish");
        }

        assert_eq!(registry.len(), 8);
        assert_eq!(registry.resolve("tmp-3"), Some(RowId(103)));
    }
}
