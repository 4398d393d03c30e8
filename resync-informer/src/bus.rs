//! In-process event bus.
//!
//! Bridges a push transport into the process: the transport side calls
//! [`InMemoryEventBus::publish`], the synchronizer side subscribes through
//! [`EventSubscriber`]. Each topic holds at most one handler and delivery
//! is synchronous, so per-topic order is the publish order.

use dashmap::DashMap;
use resync_core::{EventHandler, EventKind, EventSubscriber, ResourceScope, SubscriptionError};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
pub struct InMemoryEventBus {
    handlers: DashMap<String, EventHandler>,
    published: AtomicU64,
    undelivered: AtomicU64,
}

impl std::fmt::Debug for InMemoryEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("topics", &self.handlers.len())
            .field("published", &self.published.load(Ordering::Relaxed))
            .finish()
    }
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `payload` to the handler of `topic`.
    ///
    /// Returns false if nobody is subscribed. The handler runs on the
    /// caller's thread after the map guard is released, so handlers may
    /// subscribe or unsubscribe.
    pub fn publish(&self, topic: &str, payload: Value) -> bool {
        self.published.fetch_add(1, Ordering::Relaxed);
        let handler = self.handlers.get(topic).map(|h| Arc::clone(h.value()));
        match handler {
            Some(handler) => {
                handler(payload);
                true
            }
            None => {
                self.undelivered.fetch_add(1, Ordering::Relaxed);
                debug!(topic = %topic, "No subscriber for event");
                false
            }
        }
    }

    /// Publish on the topic of `scope` for `kind`.
    pub fn publish_event(&self, scope: &ResourceScope, kind: EventKind, payload: Value) -> bool {
        self.publish(&scope.topic(kind), payload)
    }

    pub fn has_subscriber(&self, topic: &str) -> bool {
        self.handlers.contains_key(topic)
    }

    pub fn topic_count(&self) -> usize {
        self.handlers.len()
    }

    /// Subscribed topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.handlers.iter().map(|h| h.key().clone()).collect();
        topics.sort();
        topics
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Events published with no subscriber.
    pub fn undelivered(&self) -> u64 {
        self.undelivered.load(Ordering::Relaxed)
    }
}

impl EventSubscriber for InMemoryEventBus {
    fn subscribe(&self, topic: &str, handler: EventHandler) -> Result<(), SubscriptionError> {
        if self.handlers.insert(topic.to_string(), handler).is_some() {
            debug!(topic = %topic, "Replaced existing subscriber");
        }
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) {
        self.handlers.remove(topic);
    }
}
