//! Cache store counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics about cache store usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of partitions currently held.
    pub partitions: u64,
    /// Number of entries across all partitions.
    pub entries: u64,
    /// Number of mutations that changed a partition.
    pub mutations: u64,
    /// Number of deletes for ids that were not cached.
    pub noop_deletes: u64,
    /// Number of `initialize` calls.
    pub initializations: u64,
}

impl StoreStats {
    /// Average number of entries per partition.
    pub fn mean_partition_size(&self) -> f64 {
        if self.partitions == 0 {
            0.0
        } else {
            self.entries as f64 / self.partitions as f64
        }
    }
}

/// Lock-free counters updated on the mutation path.
#[derive(Debug, Default)]
pub(crate) struct StoreCounters {
    pub mutations: AtomicU64,
    pub noop_deletes: AtomicU64,
    pub initializations: AtomicU64,
}

impl StoreCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
