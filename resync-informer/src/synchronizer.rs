//! List-then-watch synchronizer.
//!
//! The [`Synchronizer`] owns the lease table. Observing a scope opens its
//! three topic subscriptions, runs the initial List on a background task,
//! and installs the response into the [`CacheStore`] before replaying any
//! events that arrived in the meantime.
//!
//! # Example
//!
//! ```ignore
//! let sync = Synchronizer::builder(client, bus).build();
//! let scope = ResourceScope::all_namespaces("k8s", "c1", "core::v1::pods");
//!
//! let handle = sync.observe(scope.clone(), sync.default_list_input(&scope)).await?;
//! let pods = sync.snapshot(&scope)?;
//! sync.stop_observing(handle);
//! ```

use resync_core::{
    CreateError, CreateInput, EventSubscriber, FetchError, IdExtractorRegistry, ListInput,
    ResourceClient, ResourceScope, SyncConfig, SyncError, SyncResult,
};
use resync_storage::{CacheStore, ResourceCollection};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::lease::{Lease, LeaseHandle, LeaseStatus};
use crate::router::{topic_handler, TopicRouter};
use crate::stats::{bump, SyncCounters, SyncStats};

type LeaseTable = HashMap<ResourceScope, Arc<Lease>>;

struct Inner<C, E> {
    client: C,
    events: E,
    store: Arc<CacheStore>,
    config: SyncConfig,
    ids: IdExtractorRegistry,
    leases: Mutex<LeaseTable>,
    router: Arc<TopicRouter>,
    counters: Arc<SyncCounters>,
}

/// Builder for [`Synchronizer`].
pub struct SynchronizerBuilder<C, E> {
    client: C,
    events: E,
    store: Option<Arc<CacheStore>>,
    config: SyncConfig,
    ids: IdExtractorRegistry,
}

impl<C, E> SynchronizerBuilder<C, E>
where
    C: ResourceClient + 'static,
    E: EventSubscriber + 'static,
{
    /// Share an existing store instead of creating a private one.
    pub fn with_store(mut self, store: Arc<CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Per-kind id extraction chains, used for events and created objects.
    pub fn with_id_extractors(mut self, ids: IdExtractorRegistry) -> Self {
        self.ids = ids;
        self
    }

    pub fn build(self) -> Synchronizer<C, E> {
        Synchronizer {
            inner: Arc::new(Inner {
                client: self.client,
                events: self.events,
                store: self.store.unwrap_or_default(),
                config: self.config,
                ids: self.ids,
                leases: Mutex::new(HashMap::new()),
                router: Arc::new(TopicRouter::new()),
                counters: Arc::new(SyncCounters::default()),
            }),
        }
    }
}

/// Keeps one cached collection per observed scope in step with the server.
///
/// Cloning is cheap and every clone shares the same lease table and store.
/// Observing requires a running tokio runtime.
pub struct Synchronizer<C, E> {
    inner: Arc<Inner<C, E>>,
}

impl<C, E> Clone for Synchronizer<C, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C, E> std::fmt::Debug for Synchronizer<C, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("store", &self.inner.store)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<C, E> Synchronizer<C, E>
where
    C: ResourceClient + 'static,
    E: EventSubscriber + 'static,
{
    pub fn builder(client: C, events: E) -> SynchronizerBuilder<C, E> {
        SynchronizerBuilder {
            client,
            events,
            store: None,
            config: SyncConfig::default(),
            ids: IdExtractorRegistry::default(),
        }
    }

    /// Synchronizer with default configuration and a private store.
    pub fn new(client: C, events: E) -> Self {
        Self::builder(client, events).build()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.inner.store
    }

    pub fn client(&self) -> &C {
        &self.inner.client
    }

    /// List input for `scope` using the configured order and page size.
    pub fn default_list_input(&self, scope: &ResourceScope) -> ListInput {
        ListInput::for_scope(scope)
            .with_order(self.inner.config.sort.clone())
            .with_page_size(self.inner.config.page_size)
    }

    fn leases(&self) -> MutexGuard<'_, LeaseTable> {
        self.inner.leases.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lease(&self, scope: &ResourceScope) -> Option<Arc<Lease>> {
        self.leases().get(scope).cloned()
    }

    /// Start observing `scope` without waiting for the initial sync.
    ///
    /// Joins the existing lease if the scope is already observed, in which
    /// case `list_input` is ignored. Otherwise the three topics are
    /// subscribed before the List is issued, so no event can slip between
    /// the List snapshot and the subscription.
    pub fn begin_observe(&self, scope: ResourceScope, list_input: ListInput) -> LeaseHandle {
        let mut leases = self.leases();

        if let Some(existing) = leases.get(&scope) {
            if let Some(ref_count) = existing.acquire() {
                debug!(
                    scope = %scope,
                    lease_id = %existing.id,
                    ref_count,
                    "Joined existing lease"
                );
                return LeaseHandle::new(Arc::clone(existing));
            }
        }

        let lease = Arc::new(Lease::new(scope.clone(), list_input));
        self.subscribe_topics(&lease);
        leases.insert(scope.clone(), Arc::clone(&lease));
        drop(leases);

        info!(scope = %scope, lease_id = %lease.id, "Lease created");

        let handle = LeaseHandle::new(Arc::clone(&lease));
        let this = self.clone();
        tokio::spawn(async move {
            // Outcome is published through the lease status.
            let _ = this.sync(&lease, true).await;
        });
        handle
    }

    /// Observe `scope` and wait for its initial sync.
    ///
    /// On List failure the error is returned and nothing stays cached;
    /// calling again retries.
    pub async fn observe(
        &self,
        scope: ResourceScope,
        list_input: ListInput,
    ) -> SyncResult<LeaseHandle> {
        let handle = self.begin_observe(scope, list_input);
        match handle.ready().await {
            Ok(()) => Ok(handle),
            Err(e) => {
                self.stop_observing(handle);
                Err(e)
            }
        }
    }

    /// Release one reference. The last release unsubscribes the topics and
    /// discards the cached collection.
    pub fn stop_observing(&self, handle: LeaseHandle) {
        self.release(handle.lease());
    }

    /// Release the reference a handle accounts for without consuming it.
    /// Callers must not use the handle's reference afterwards.
    pub(crate) fn release(&self, lease: &Arc<Lease>) {
        let mut leases = self.leases();

        match lease.release() {
            None => {
                debug!(scope = %lease.scope, lease_id = %lease.id, "Lease already released");
            }
            Some(0) => {
                self.teardown(&mut leases, lease, LeaseStatus::Released);
                info!(scope = %lease.scope, lease_id = %lease.id, "Lease released");
            }
            Some(ref_count) => {
                debug!(
                    scope = %lease.scope,
                    lease_id = %lease.id,
                    ref_count,
                    "Lease reference dropped"
                );
            }
        }
    }

    /// Create a resource.
    ///
    /// The cache is not written; the resource appears once its ADD event
    /// arrives, or after a re-List if it has not arrived within the
    /// configured grace period.
    pub async fn create(
        &self,
        scope: &ResourceScope,
        params: Map<String, Value>,
        input: Value,
    ) -> SyncResult<Value> {
        bump(&self.inner.counters.creates);
        let request = CreateInput {
            params,
            input,
            namespaces: scope.namespaces().clone(),
        };

        let timeout = self.inner.config.create_timeout;
        let result =
            match tokio::time::timeout(timeout, self.inner.client.create(scope, &request)).await {
                Ok(result) => result,
                Err(_) => Err(CreateError::Timeout {
                    timeout_ms: millis(timeout),
                }),
            };

        let created = match result {
            Ok(created) => created,
            Err(e) => {
                bump(&self.inner.counters.create_failures);
                warn!(scope = %scope, error = %e, "Create failed");
                return Err(e.into());
            }
        };

        let id = self.inner.ids.extract(scope.resource_kind(), &created);
        match &id {
            Some(id) => info!(scope = %scope, id = %id, "Resource {} created", id),
            None => info!(scope = %scope, "Resource created"),
        }

        if let Some(lease) = self.lease(scope) {
            lease.await_convergence(id, &self.inner.store);
        }
        Ok(created)
    }

    /// Re-run the List for an observed scope.
    ///
    /// Events arriving meanwhile are buffered and replayed on top of the
    /// new collection. Returns immediately if a List is already in flight.
    pub async fn refresh(&self, handle: &LeaseHandle) -> SyncResult<()> {
        match handle.lease().begin_refresh() {
            None => Err(SyncError::Cancelled {
                scope: handle.scope().to_string(),
            }),
            Some(false) => Ok(()),
            Some(true) => self.sync(handle.lease(), false).await,
        }
    }

    /// Current cached collection of `scope`.
    pub fn snapshot(&self, scope: &ResourceScope) -> SyncResult<Option<Arc<ResourceCollection>>> {
        Ok(self.inner.store.snapshot(scope)?)
    }

    /// Age of the oldest create on this lease still waiting for its event.
    pub fn pending_convergence(&self, handle: &LeaseHandle) -> Option<Duration> {
        handle.lease().oldest_pending()
    }

    pub fn stats(&self) -> SyncStats {
        self.inner.counters.snapshot()
    }

    /// Number of live leases.
    pub fn lease_count(&self) -> usize {
        self.leases().len()
    }

    pub fn is_observing(&self, scope: &ResourceScope) -> bool {
        self.leases().contains_key(scope)
    }

    /// Observed scopes, sorted.
    pub fn observed_scopes(&self) -> Vec<ResourceScope> {
        let mut scopes: Vec<ResourceScope> = self.leases().keys().cloned().collect();
        scopes.sort();
        scopes
    }

    /// Route all three topics to `lease` or none.
    ///
    /// Only the first lease on a topic subscribes it on the transport;
    /// later leases for the same kind share that subscription.
    fn subscribe_topics(&self, lease: &Arc<Lease>) {
        let ids = self.inner.ids.for_kind(lease.scope.resource_kind());
        let mut attached: Vec<String> = Vec::with_capacity(3);

        for (kind, topic) in lease.scope.topics() {
            if !self.inner.router.attach(&topic, lease) {
                debug!(scope = %lease.scope, topic = %topic, "Sharing existing subscription");
                attached.push(topic);
                continue;
            }

            let handler = topic_handler(
                &self.inner.router,
                topic.clone(),
                kind,
                ids.clone(),
                Arc::clone(&self.inner.store),
                Arc::clone(&self.inner.counters),
            );
            if let Err(e) = self.inner.events.subscribe(&topic, handler) {
                self.inner.router.detach(&topic, lease);
                self.release_topics(lease, &attached);
                bump(&self.inner.counters.subscription_failures);
                warn!(
                    scope = %lease.scope,
                    topic = %topic,
                    error = %e,
                    "Event subscription failed, serving List-only cache"
                );
                lease.mark_degraded(e);
                return;
            }
            debug!(scope = %lease.scope, topic = %topic, "Subscribed");
            attached.push(topic);
        }

        lease.set_topics(attached);
    }

    /// Detach `lease` from `topics`, unsubscribing those nobody else uses.
    fn release_topics(&self, lease: &Arc<Lease>, topics: &[String]) {
        for topic in topics {
            if self.inner.router.detach(topic, lease) {
                self.inner.events.unsubscribe(topic);
                debug!(scope = %lease.scope, topic = %topic, "Unsubscribed");
            }
        }
    }

    /// Run one List for `lease` and install the result.
    async fn sync(&self, lease: &Arc<Lease>, initial: bool) -> SyncResult<()> {
        let scope = &lease.scope;
        let started = Instant::now();
        bump(&self.inner.counters.lists);
        debug!(scope = %scope, lease_id = %lease.id, initial, "Listing resources");

        let timeout = self.inner.config.list_timeout;
        let result =
            match tokio::time::timeout(timeout, self.inner.client.list(scope, &lease.list_input))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout {
                    timeout_ms: millis(timeout),
                }),
            };

        let list = match result {
            Ok(list) => list,
            Err(e) => {
                bump(&self.inner.counters.list_failures);
                warn!(scope = %scope, error = %e, initial, "List failed");
                let error = SyncError::from(e);
                self.abort_sync(lease, initial, error.clone());
                return Err(error);
            }
        };

        let entries = list.len();
        let collection = ResourceCollection::from_list(scope.clone(), list);
        match lease.install(&self.inner.store, collection, started, &self.inner.counters) {
            Ok(Some(installed)) => {
                info!(
                    scope = %scope,
                    lease_id = %lease.id,
                    entries,
                    replayed = installed.replayed,
                    revision = installed.revision.sequence,
                    "Collection synchronized"
                );
                Ok(())
            }
            Ok(None) => {
                bump(&self.inner.counters.lists_discarded);
                debug!(
                    scope = %scope,
                    lease_id = %lease.id,
                    "Discarding List response for released lease"
                );
                Err(SyncError::Cancelled {
                    scope: scope.to_string(),
                })
            }
            Err(e) => {
                warn!(scope = %scope, error = %e, "Failed to install collection");
                let error = SyncError::from(e);
                self.abort_sync(lease, initial, error.clone());
                Err(error)
            }
        }
    }

    /// An initial sync failure tears the lease down; a refresh failure
    /// keeps the previous collection.
    fn abort_sync(&self, lease: &Arc<Lease>, initial: bool, error: SyncError) {
        if initial {
            let mut leases = self.leases();
            self.teardown(&mut leases, lease, LeaseStatus::Failed(error));
        } else {
            let replayed = lease.resume(&self.inner.store, &self.inner.counters);
            debug!(scope = %lease.scope, replayed, "Refresh failed, keeping previous collection");
        }
    }

    /// Remove `lease` from the table, detach it from its topics and drop
    /// its partition. Must run under the table lock so a successor lease
    /// for the same scope cannot subscribe in between.
    fn teardown(&self, leases: &mut LeaseTable, lease: &Arc<Lease>, status: LeaseStatus) {
        if leases
            .get(&lease.scope)
            .is_some_and(|current| Arc::ptr_eq(current, lease))
        {
            leases.remove(&lease.scope);
        }

        let Some(topics) = lease.deactivate(status) else {
            return;
        };
        self.release_topics(lease, &topics);
        self.inner.store.discard(&lease.scope);
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
