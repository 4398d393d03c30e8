//! Observation leases.
//!
//! One [`Lease`] exists per observed scope. It owns the reference count,
//! the three topic subscriptions, the buffer of events that arrive while a
//! List is in flight, and the status consumers wait on.
//!
//! # Lock Order
//!
//! lease table -> topic routes -> lease state -> store partition. Event
//! handlers release the routes before delivering, so they never hold more
//! than the last two at once.

use resync_core::{
    Change, EventKind, LeaseId, ListInput, ResourceEvent, ResourceId, ResourceScope, StoreError,
    SubscriptionError, SyncError, SyncResult,
};
use resync_storage::{CacheStore, ResourceCollection, Revision};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::stats::{bump, SyncCounters};

/// Externally visible state of a lease.
#[derive(Debug, Clone, PartialEq)]
pub enum LeaseStatus {
    /// Initial List in flight.
    Loading,
    /// Collection installed and events flowing.
    Live,
    /// Collection installed but the event subscription failed, so the
    /// cache only changes on refresh.
    Degraded(SubscriptionError),
    /// Initial List failed; the lease was torn down.
    Failed(SyncError),
    /// Every holder stopped observing.
    Released,
}

impl LeaseStatus {
    /// Returns true once the initial sync has an outcome.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Loading)
    }

    /// Returns true if the lease serves a collection.
    pub fn is_serving(&self) -> bool {
        matches!(self, Self::Live | Self::Degraded(_))
    }
}

pub(crate) enum Phase {
    /// A List is in flight; events are held in arrival order.
    Syncing { buffer: Vec<ResourceEvent> },
    Live,
}

/// A successful Create whose ADD event has not been seen yet.
pub(crate) struct PendingCreate {
    id: Option<ResourceId>,
    since: Instant,
}

pub(crate) struct LeaseState {
    ref_count: usize,
    active: bool,
    phase: Phase,
    degraded: Option<SubscriptionError>,
    topics: Vec<String>,
    awaiting: Vec<PendingCreate>,
}

impl LeaseState {
    /// Forget pending creates satisfied by an ADD or UPDATE of `id`.
    fn settle(&mut self, kind: EventKind, id: &str) {
        if kind != EventKind::Delete {
            self.awaiting.retain(|p| p.id.as_deref() != Some(id));
        }
    }

    fn take_buffer(&mut self) -> Vec<ResourceEvent> {
        match std::mem::replace(&mut self.phase, Phase::Live) {
            Phase::Syncing { buffer } => buffer,
            Phase::Live => Vec::new(),
        }
    }
}

/// Result of installing a List response.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Installed {
    pub revision: Revision,
    pub replayed: usize,
}

pub(crate) struct Lease {
    pub id: LeaseId,
    pub scope: ResourceScope,
    pub list_input: ListInput,
    state: Mutex<LeaseState>,
    status: watch::Sender<LeaseStatus>,
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("scope", &self.scope.to_string())
            .field("status", &*self.status.borrow())
            .finish()
    }
}

impl Lease {
    /// A fresh lease held once, syncing, with no subscriptions yet.
    pub fn new(scope: ResourceScope, list_input: ListInput) -> Self {
        let (status, _) = watch::channel(LeaseStatus::Loading);
        Self {
            id: resync_core::new_lease_id(),
            scope,
            list_input,
            state: Mutex::new(LeaseState {
                ref_count: 1,
                active: true,
                phase: Phase::Syncing { buffer: Vec::new() },
                degraded: None,
                topics: Vec::new(),
                awaiting: Vec::new(),
            }),
            status,
        }
    }

    fn state(&self) -> MutexGuard<'_, LeaseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub fn status(&self) -> LeaseStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<LeaseStatus> {
        self.status.subscribe()
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.state().active
    }

    #[cfg(test)]
    pub fn ref_count(&self) -> usize {
        self.state().ref_count
    }

    #[cfg(test)]
    pub fn degraded(&self) -> Option<SubscriptionError> {
        self.state().degraded.clone()
    }

    #[cfg(test)]
    pub fn is_syncing(&self) -> bool {
        matches!(self.state().phase, Phase::Syncing { .. })
    }

    /// Record the topics this lease is routed on.
    pub fn set_topics(&self, topics: Vec<String>) {
        self.state().topics = topics;
    }

    /// Serve List results only. Events buffered while some topics were
    /// briefly attached are discarded with them.
    pub fn mark_degraded(&self, error: SubscriptionError) {
        let mut state = self.state();
        state.topics.clear();
        state.degraded = Some(error);
        if let Phase::Syncing { buffer } = &mut state.phase {
            if !buffer.is_empty() {
                debug!(
                    scope = %self.scope,
                    discarded = buffer.len(),
                    "Discarding events buffered before subscription failed"
                );
                buffer.clear();
            }
        }
    }

    /// Take one more reference. `None` if the lease was torn down.
    pub fn acquire(&self) -> Option<usize> {
        let mut state = self.state();
        if !state.active {
            return None;
        }
        state.ref_count += 1;
        Some(state.ref_count)
    }

    /// Drop one reference, returning the remaining count. `None` if the
    /// lease was already torn down.
    pub fn release(&self) -> Option<usize> {
        let mut state = self.state();
        if !state.active {
            return None;
        }
        state.ref_count = state.ref_count.saturating_sub(1);
        Some(state.ref_count)
    }

    /// Deactivate and publish the final status.
    ///
    /// Returns the topics to detach from, or `None` if the lease was
    /// already inactive.
    pub fn deactivate(&self, status: LeaseStatus) -> Option<Vec<String>> {
        let mut state = self.state();
        if !state.active {
            return None;
        }
        state.active = false;
        state.ref_count = 0;
        state.phase = Phase::Live;
        state.awaiting.clear();
        self.status.send_replace(status);
        Some(std::mem::take(&mut state.topics))
    }

    /// Route one decoded, in-scope event.
    pub fn deliver(&self, event: ResourceEvent, store: &CacheStore, counters: &SyncCounters) {
        let mut guard = self.state();
        let state = &mut *guard;

        if !state.active {
            bump(&counters.events_dropped_late);
            debug!(scope = %self.scope, id = event.id(), "Ignoring event for released lease");
            return;
        }

        if let Phase::Syncing { buffer } = &mut state.phase {
            debug!(
                scope = %self.scope,
                id = event.id(),
                kind = %event.kind(),
                "Buffering event while List is in flight"
            );
            buffer.push(event);
            bump(&counters.events_buffered);
            return;
        }

        state.settle(event.kind(), event.id());
        apply_event(store, &self.scope, event, counters);
    }

    /// Install a List response and replay the buffered events.
    ///
    /// Returns `Ok(None)` without touching the store if the lease was
    /// released while the List was in flight. Pending creates older than
    /// `list_started` are resolved by the fresh collection.
    pub fn install(
        &self,
        store: &CacheStore,
        collection: ResourceCollection,
        list_started: Instant,
        counters: &SyncCounters,
    ) -> Result<Option<Installed>, StoreError> {
        let mut guard = self.state();
        let state = &mut *guard;
        if !state.active {
            return Ok(None);
        }

        store.initialize(&self.scope, collection)?;

        let buffered = state.take_buffer();
        let replayed = buffered.len();
        for event in buffered {
            state.settle(event.kind(), event.id());
            apply_event(store, &self.scope, event, counters);
        }
        state.awaiting.retain(|p| p.since > list_started);

        let status = match &state.degraded {
            Some(e) => LeaseStatus::Degraded(e.clone()),
            None => LeaseStatus::Live,
        };
        self.status.send_replace(status);

        let revision = store.revision(&self.scope)?.unwrap_or_default();
        Ok(Some(Installed { revision, replayed }))
    }

    /// Leave the syncing phase after a failed refresh, applying whatever
    /// was buffered onto the existing collection.
    pub fn resume(&self, store: &CacheStore, counters: &SyncCounters) -> usize {
        let mut guard = self.state();
        let state = &mut *guard;
        if !state.active {
            return 0;
        }
        let buffered = state.take_buffer();
        let replayed = buffered.len();
        for event in buffered {
            state.settle(event.kind(), event.id());
            apply_event(store, &self.scope, event, counters);
        }
        replayed
    }

    /// Enter the syncing phase for a refresh.
    ///
    /// `None` if the lease is gone, `Some(false)` if a List is already in
    /// flight.
    pub fn begin_refresh(&self) -> Option<bool> {
        let mut state = self.state();
        if !state.active {
            return None;
        }
        if matches!(state.phase, Phase::Syncing { .. }) {
            return Some(false);
        }
        state.phase = Phase::Syncing { buffer: Vec::new() };
        Some(true)
    }

    /// Remember a created resource until its event shows up.
    pub fn await_convergence(&self, id: Option<ResourceId>, store: &CacheStore) {
        let mut state = self.state();
        if !state.active {
            return;
        }
        if let (Some(id), Phase::Live) = (&id, &state.phase) {
            let seen = store
                .snapshot(&self.scope)
                .ok()
                .flatten()
                .is_some_and(|c| c.contains(id));
            if seen {
                return;
            }
        }
        state.awaiting.push(PendingCreate {
            id,
            since: Instant::now(),
        });
    }

    /// Age of the oldest create still waiting for its event.
    pub fn oldest_pending(&self) -> Option<Duration> {
        self.state()
            .awaiting
            .iter()
            .map(|p| p.since.elapsed())
            .max()
    }
}

/// Apply one event to the store. Store failures are logged, not propagated.
fn apply_event(
    store: &CacheStore,
    scope: &ResourceScope,
    event: ResourceEvent,
    counters: &SyncCounters,
) {
    let kind = event.kind();
    let id = event.id().to_string();
    let result = match event.change {
        Change::Added { id, data } => store.apply_add(scope, id, data),
        Change::Updated { id, data } => store.apply_update(scope, id, data),
        Change::Deleted { id } => store.apply_delete(scope, &id),
    };
    match result {
        Ok(outcome) => {
            bump(&counters.events_applied);
            debug!(scope = %scope, id = %id, kind = %kind, ?outcome, "Applied event");
        }
        Err(e) => {
            warn!(scope = %scope, id = %id, kind = %kind, error = %e, "Failed to apply event");
        }
    }
}

/// A caller's reference to an observed scope.
///
/// Each handle accounts for exactly one reference; pass it back to
/// `Synchronizer::stop_observing` to release it.
pub struct LeaseHandle {
    lease: Arc<Lease>,
    status: watch::Receiver<LeaseStatus>,
}

impl fmt::Debug for LeaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseHandle")
            .field("lease_id", &self.lease.id)
            .field("scope", &self.lease.scope.to_string())
            .finish()
    }
}

impl LeaseHandle {
    pub(crate) fn new(lease: Arc<Lease>) -> Self {
        let status = lease.watch_status();
        Self { lease, status }
    }

    pub(crate) fn lease(&self) -> &Arc<Lease> {
        &self.lease
    }

    /// Identity of the lease generation this handle belongs to.
    pub fn id(&self) -> LeaseId {
        self.lease.id
    }

    pub fn scope(&self) -> &ResourceScope {
        &self.lease.scope
    }

    pub fn status(&self) -> LeaseStatus {
        self.status.borrow().clone()
    }

    /// Wait for the initial sync outcome.
    pub async fn ready(&self) -> SyncResult<()> {
        let mut status = self.status.clone();
        let settled = match status.wait_for(LeaseStatus::is_settled).await {
            Ok(settled) => settled.clone(),
            Err(_) => LeaseStatus::Released,
        };
        match settled {
            LeaseStatus::Live | LeaseStatus::Degraded(_) => Ok(()),
            LeaseStatus::Failed(e) => Err(e),
            LeaseStatus::Loading | LeaseStatus::Released => Err(SyncError::Cancelled {
                scope: self.lease.scope.to_string(),
            }),
        }
    }
}
