//! Topic fan-out.
//!
//! Scopes that differ only in their namespace filter derive the same three
//! topics, while the transport keeps one handler per topic. The router owns
//! that single subscription and hands each delivery to every lease routed
//! on the topic; each lease then keeps only the events inside its scope.

use resync_core::{EventHandler, EventKind, IdExtractor, ResourceEvent};
use resync_storage::CacheStore;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::lease::Lease;
use crate::stats::{bump, SyncCounters};

#[derive(Debug, Default)]
pub(crate) struct TopicRouter {
    routes: Mutex<HashMap<String, Vec<Arc<Lease>>>>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn routes(&self) -> MutexGuard<'_, HashMap<String, Vec<Arc<Lease>>>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route `topic` to `lease`.
    ///
    /// Returns true if the topic had no route yet; the caller then owns
    /// subscribing it on the transport.
    pub fn attach(&self, topic: &str, lease: &Arc<Lease>) -> bool {
        let mut routes = self.routes();
        let leases = routes.entry(topic.to_string()).or_default();
        let first = leases.is_empty();
        if !leases.iter().any(|l| Arc::ptr_eq(l, lease)) {
            leases.push(Arc::clone(lease));
        }
        first
    }

    /// Remove `lease` from `topic`.
    ///
    /// Returns true if no lease is left on the topic; the caller then owns
    /// unsubscribing it.
    pub fn detach(&self, topic: &str, lease: &Arc<Lease>) -> bool {
        let mut routes = self.routes();
        let Some(leases) = routes.get_mut(topic) else {
            return false;
        };
        leases.retain(|l| !Arc::ptr_eq(l, lease));
        if leases.is_empty() {
            routes.remove(topic);
            true
        } else {
            false
        }
    }

    /// Leases currently routed on `topic`.
    pub fn leases(&self, topic: &str) -> Vec<Arc<Lease>> {
        self.routes().get(topic).cloned().unwrap_or_default()
    }

    #[cfg(test)]
    pub fn topic_count(&self) -> usize {
        self.routes().len()
    }
}

/// Build the transport handler for `topic`.
///
/// Decodes each payload once, then delivers it to every routed lease whose
/// scope contains the event's origin. The handler holds the router weakly,
/// so a delivery racing the synchronizer's shutdown is counted as late.
pub(crate) fn topic_handler(
    router: &Arc<TopicRouter>,
    topic: String,
    kind: EventKind,
    ids: IdExtractor,
    store: Arc<CacheStore>,
    counters: Arc<SyncCounters>,
) -> EventHandler {
    let router = Arc::downgrade(router);
    Arc::new(move |raw: Value| {
        let leases = router
            .upgrade()
            .map(|router| router.leases(&topic))
            .unwrap_or_default();
        if leases.is_empty() {
            bump(&counters.events_dropped_late);
            debug!(topic = %topic, "Ignoring event with no observing lease");
            return;
        }

        let event = match ResourceEvent::decode(kind, raw, &ids) {
            Ok(event) => event,
            Err(e) => {
                bump(&counters.events_dropped_malformed);
                warn!(topic = %topic, error = %e, "Dropping malformed event");
                return;
            }
        };

        let mut delivered = false;
        for lease in leases
            .iter()
            .filter(|lease| event.origin.belongs_to(&lease.scope))
        {
            lease.deliver(event.clone(), &store, &counters);
            delivered = true;
        }

        if !delivered {
            bump(&counters.events_dropped_out_of_scope);
            warn!(
                topic = %topic,
                id = event.id(),
                connection = %event.origin.connection,
                key = %event.origin.key,
                namespace = %event.origin.namespace,
                "Dropping out-of-scope event"
            );
        }
    })
}
