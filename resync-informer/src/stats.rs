//! Synchronizer counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time synchronizer statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// List calls issued, initial syncs and refreshes alike.
    pub lists: u64,
    pub list_failures: u64,
    /// List responses discarded because their lease was released.
    pub lists_discarded: u64,
    pub creates: u64,
    pub create_failures: u64,
    /// Events applied to the store, directly or by replay.
    pub events_applied: u64,
    /// Events held back while a List was in flight.
    pub events_buffered: u64,
    pub events_dropped_malformed: u64,
    pub events_dropped_out_of_scope: u64,
    /// Events delivered to a released lease.
    pub events_dropped_late: u64,
    pub subscription_failures: u64,
}

impl SyncStats {
    /// Total events dropped for any reason.
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped_malformed + self.events_dropped_out_of_scope + self.events_dropped_late
    }

    /// Fraction of List calls that failed (0.0 to 1.0).
    pub fn list_failure_rate(&self) -> f64 {
        if self.lists == 0 {
            0.0
        } else {
            self.list_failures as f64 / self.lists as f64
        }
    }
}

/// Shared atomic counters, cloned into every event handler.
#[derive(Debug, Default)]
pub(crate) struct SyncCounters {
    pub lists: AtomicU64,
    pub list_failures: AtomicU64,
    pub lists_discarded: AtomicU64,
    pub creates: AtomicU64,
    pub create_failures: AtomicU64,
    pub events_applied: AtomicU64,
    pub events_buffered: AtomicU64,
    pub events_dropped_malformed: AtomicU64,
    pub events_dropped_out_of_scope: AtomicU64,
    pub events_dropped_late: AtomicU64,
    pub subscription_failures: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl SyncCounters {
    pub fn snapshot(&self) -> SyncStats {
        let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
        SyncStats {
            lists: read(&self.lists),
            list_failures: read(&self.list_failures),
            lists_discarded: read(&self.lists_discarded),
            creates: read(&self.creates),
            create_failures: read(&self.create_failures),
            events_applied: read(&self.events_applied),
            events_buffered: read(&self.events_buffered),
            events_dropped_malformed: read(&self.events_dropped_malformed),
            events_dropped_out_of_scope: read(&self.events_dropped_out_of_scope),
            events_dropped_late: read(&self.events_dropped_late),
            subscription_failures: read(&self.subscription_failures),
        }
    }
}
