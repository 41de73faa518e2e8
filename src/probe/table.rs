//! The correlation table shared by the sender, receiver and timeout monitor.

use crate::core::InFlightQuery;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Maps outstanding query identifiers to their in-flight metadata.
///
/// Every operation takes the single table lock, so a removal is observed by
/// exactly one caller even when the receiver and the timeout monitor race on
/// the same identifier.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    entries: Mutex<HashMap<u16, InFlightQuery>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u16, InFlightQuery>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records an outstanding query.
    ///
    /// Returns the entry previously stored under the same identifier, which is
    /// only possible if the identifier space wrapped while that query was
    /// still outstanding.
    pub fn insert(&self, query: InFlightQuery) -> Option<InFlightQuery> {
        self.lock().insert(query.id, query)
    }

    /// Removes and returns the entry for `id`, if any.
    pub fn remove_if_present(&self, id: u16) -> Option<InFlightQuery> {
        self.lock().remove(&id)
    }

    /// Removes and returns the entry for `id` only if `predicate` accepts it.
    /// The check and the removal happen under the same lock.
    pub fn remove_if<F>(&self, id: u16, predicate: F) -> Option<InFlightQuery>
    where
        F: FnOnce(&InFlightQuery) -> bool,
    {
        let mut entries = self.lock();
        match entries.get(&id) {
            Some(query) if predicate(query) => entries.remove(&id),
            _ => None,
        }
    }

    /// Identifiers outstanding at the time of the call.
    pub fn snapshot_keys(&self) -> Vec<u16> {
        self.lock().keys().copied().collect()
    }

    pub fn contains(&self, id: u16) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
