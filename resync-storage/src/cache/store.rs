//! Partitioned, copy-on-write cache store.
//!
//! # Partitioning
//!
//! The store is a [`DashMap`] from [`ResourceScope`] to an `Arc<Partition>`.
//! Each partition owns its own `RwLock`, so mutations on different scopes
//! never contend. The map shard guard is always released before a
//! partition lock is taken.
//!
//! # Snapshots
//!
//! A partition holds an `Arc<ResourceCollection>`. Readers clone the `Arc`
//! under a short read lock and keep an immutable value. Writers go through
//! `Arc::make_mut`, which copies the collection only while a snapshot of it
//! is still alive, so outstanding snapshots never observe later mutations.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use resync_core::{ResourceId, ResourceScope, StoreError};
use serde_json::Value;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::collection::ResourceCollection;
use super::revision::Revision;
use super::stats::{StoreCounters, StoreStats};

/// What a single mutation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// A new id was added.
    Inserted,
    /// An existing id was overwritten.
    Replaced,
    /// An existing id was removed.
    Removed,
    /// Delete of an id that was not cached.
    Absent,
    /// The scope has no initialized partition; nothing changed.
    NoPartition,
}

impl MutationOutcome {
    /// Returns true if the mutation touched an initialized partition.
    pub fn is_applied(&self) -> bool {
        !matches!(self, Self::NoPartition)
    }
}

struct Partition {
    collection: RwLock<Arc<ResourceCollection>>,
}

impl Partition {
    fn new(collection: ResourceCollection) -> Self {
        Self {
            collection: RwLock::new(Arc::new(collection)),
        }
    }

    fn read(
        &self,
        scope: &ResourceScope,
    ) -> Result<RwLockReadGuard<'_, Arc<ResourceCollection>>, StoreError> {
        self.collection.read().map_err(|_| poisoned(scope))
    }

    fn write(
        &self,
        scope: &ResourceScope,
    ) -> Result<RwLockWriteGuard<'_, Arc<ResourceCollection>>, StoreError> {
        self.collection.write().map_err(|_| poisoned(scope))
    }
}

fn poisoned(scope: &ResourceScope) -> StoreError {
    StoreError::LockPoisoned {
        scope: scope.to_string(),
    }
}

/// Process-local store of one [`ResourceCollection`] per active scope.
#[derive(Default)]
pub struct CacheStore {
    partitions: DashMap<ResourceScope, Arc<Partition>>,
    counters: StoreCounters,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("partitions", &self.partitions.len())
            .field("counters", &self.counters)
            .finish()
    }
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, scope: &ResourceScope) -> Option<Arc<Partition>> {
        self.partitions.get(scope).map(|p| Arc::clone(p.value()))
    }

    /// Install or replace the collection of `scope`.
    ///
    /// The installed collection continues the revision history of the one
    /// it replaces.
    pub fn initialize(
        &self,
        scope: &ResourceScope,
        mut collection: ResourceCollection,
    ) -> Result<Revision, StoreError> {
        StoreCounters::bump(&self.counters.initializations);

        let partition = match self.partitions.entry(scope.clone()) {
            Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            Entry::Vacant(vacant) => {
                let revision = Revision::zero().next();
                collection.set_revision(revision);
                vacant.insert(Arc::new(Partition::new(collection)));
                return Ok(revision);
            }
        };

        let mut guard = partition.write(scope)?;
        let revision = guard.revision().next();
        collection.set_revision(revision);
        *guard = Arc::new(collection);
        Ok(revision)
    }

    /// Idempotent upsert.
    pub fn apply_add(
        &self,
        scope: &ResourceScope,
        id: ResourceId,
        payload: Value,
    ) -> Result<MutationOutcome, StoreError> {
        self.upsert(scope, id, payload)
    }

    /// Replace if present, otherwise identical to [`apply_add`](Self::apply_add).
    pub fn apply_update(
        &self,
        scope: &ResourceScope,
        id: ResourceId,
        payload: Value,
    ) -> Result<MutationOutcome, StoreError> {
        self.upsert(scope, id, payload)
    }

    fn upsert(
        &self,
        scope: &ResourceScope,
        id: ResourceId,
        payload: Value,
    ) -> Result<MutationOutcome, StoreError> {
        let Some(partition) = self.partition(scope) else {
            return Ok(MutationOutcome::NoPartition);
        };
        let mut guard = partition.write(scope)?;

        // Re-applying the cached payload leaves the revision alone.
        if guard.get(&id).is_some_and(|entry| entry.payload == payload) {
            return Ok(MutationOutcome::Replaced);
        }

        let replaced = Arc::make_mut(&mut *guard).upsert(id, payload);
        StoreCounters::bump(&self.counters.mutations);
        Ok(if replaced {
            MutationOutcome::Replaced
        } else {
            MutationOutcome::Inserted
        })
    }

    /// Remove `id` if present; an absent id is a no-op.
    pub fn apply_delete(
        &self,
        scope: &ResourceScope,
        id: &str,
    ) -> Result<MutationOutcome, StoreError> {
        let Some(partition) = self.partition(scope) else {
            return Ok(MutationOutcome::NoPartition);
        };
        let mut guard = partition.write(scope)?;

        if !guard.contains(id) {
            StoreCounters::bump(&self.counters.noop_deletes);
            return Ok(MutationOutcome::Absent);
        }

        Arc::make_mut(&mut *guard).remove(id);
        StoreCounters::bump(&self.counters.mutations);
        Ok(MutationOutcome::Removed)
    }

    /// Immutable snapshot of the collection of `scope`.
    pub fn snapshot(
        &self,
        scope: &ResourceScope,
    ) -> Result<Option<Arc<ResourceCollection>>, StoreError> {
        let Some(partition) = self.partition(scope) else {
            return Ok(None);
        };
        let guard = partition.read(scope)?;
        let snapshot = Arc::clone(&*guard);
        Ok(Some(snapshot))
    }

    /// Drop the partition of `scope`. Returns true if one existed.
    pub fn discard(&self, scope: &ResourceScope) -> bool {
        self.partitions.remove(scope).is_some()
    }

    /// Current revision of `scope`, if it has a partition.
    pub fn revision(&self, scope: &ResourceScope) -> Result<Option<Revision>, StoreError> {
        Ok(self.snapshot(scope)?.map(|collection| collection.revision()))
    }

    pub fn contains_scope(&self, scope: &ResourceScope) -> bool {
        self.partitions.contains_key(scope)
    }

    /// Scopes with a partition, sorted.
    pub fn scopes(&self) -> Vec<ResourceScope> {
        let mut scopes: Vec<ResourceScope> =
            self.partitions.iter().map(|p| p.key().clone()).collect();
        scopes.sort();
        scopes
    }

    /// Point-in-time statistics. Poisoned partitions are skipped.
    pub fn stats(&self) -> StoreStats {
        let partitions: Vec<(ResourceScope, Arc<Partition>)> = self
            .partitions
            .iter()
            .map(|p| (p.key().clone(), Arc::clone(p.value())))
            .collect();

        let entries = partitions
            .iter()
            .filter_map(|(scope, partition)| partition.read(scope).ok().map(|c| c.len() as u64))
            .sum();

        StoreStats {
            partitions: partitions.len() as u64,
            entries,
            mutations: StoreCounters::read(&self.counters.mutations),
            noop_deletes: StoreCounters::read(&self.counters.noop_deletes),
            initializations: StoreCounters::read(&self.counters.initializations),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
