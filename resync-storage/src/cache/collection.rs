//! Materialized resource collections.

use chrono::Utc;
use resync_core::{ListResult, ResourceId, ResourceScope, SortOrder, Timestamp};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use super::revision::Revision;

/// A single cached resource.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub id: ResourceId,
    /// Opaque object; its schema belongs to the resource kind.
    pub payload: Value,
}

impl CacheEntry {
    pub fn new(id: impl Into<ResourceId>, payload: Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

/// The cached state of one scope.
///
/// Entries are stored unordered; use [`sorted`](Self::sorted) for the
/// deterministic consumer-facing order.
#[derive(Debug, Clone)]
pub struct ResourceCollection {
    scope: ResourceScope,
    entries: HashMap<ResourceId, CacheEntry>,
    fetched_at: Timestamp,
    revision: Revision,
}

impl ResourceCollection {
    /// An empty collection fetched now.
    pub fn new(scope: ResourceScope) -> Self {
        Self {
            scope,
            entries: HashMap::new(),
            fetched_at: Utc::now(),
            revision: Revision::zero(),
        }
    }

    /// Build a collection from `(id, payload)` pairs. Later duplicates win.
    pub fn from_entries<I>(scope: ResourceScope, entries: I) -> Self
    where
        I: IntoIterator<Item = (ResourceId, Value)>,
    {
        let mut collection = Self::new(scope);
        for (id, payload) in entries {
            collection
                .entries
                .insert(id.clone(), CacheEntry::new(id, payload));
        }
        collection
    }

    /// Build a collection from a List response.
    pub fn from_list(scope: ResourceScope, list: ListResult) -> Self {
        Self::from_entries(scope, list.result)
    }

    pub fn scope(&self) -> &ResourceScope {
        &self.scope
    }

    pub fn entries(&self) -> &HashMap<ResourceId, CacheEntry> {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&CacheEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// When the underlying List was fetched.
    pub fn fetched_at(&self) -> Timestamp {
        self.fetched_at
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Time elapsed since the List that seeded this collection.
    pub fn staleness(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.fetched_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Returns true if the seeding List ran at or after `timestamp`.
    pub fn is_fresh_as_of(&self, timestamp: Timestamp) -> bool {
        self.fetched_at >= timestamp
    }

    /// Entries in the given order.
    pub fn sorted(&self, order: &SortOrder) -> Vec<CacheEntry> {
        let mut entries: Vec<&CacheEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| order.compare((a.id.as_str(), &a.payload), (b.id.as_str(), &b.payload)));
        entries.into_iter().cloned().collect()
    }

    /// Ids in the given order.
    pub fn sorted_ids(&self, order: &SortOrder) -> Vec<ResourceId> {
        self.sorted(order).into_iter().map(|e| e.id).collect()
    }

    pub(crate) fn set_revision(&mut self, revision: Revision) {
        self.revision = revision;
    }

    /// Insert or overwrite. Returns true if an entry was replaced.
    pub(crate) fn upsert(&mut self, id: ResourceId, payload: Value) -> bool {
        let replaced = self
            .entries
            .insert(id.clone(), CacheEntry::new(id, payload))
            .is_some();
        self.revision = self.revision.next();
        replaced
    }

    /// Remove if present. Returns true if an entry was removed.
    pub(crate) fn remove(&mut self, id: &str) -> bool {
        let removed = self.entries.remove(id).is_some();
        if removed {
            self.revision = self.revision.next();
        }
        removed
    }
}
