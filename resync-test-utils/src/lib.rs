//! RESYNC Test Utilities
//!
//! Centralized test infrastructure for the RESYNC workspace:
//! - A scripted mock resource client
//! - An event transport wrapper that rejects chosen topics
//! - Proptest generators for informer event sequences
//! - Test fixtures for pods and informer payloads
//! - Custom assertions for cached collections

// Re-export core types for convenience
pub use resync_core::{
    CreateError, CreateInput, EventHandler, EventKind, EventSubscriber, FetchError, IdExtractor,
    ListInput, ListResult, ResourceClient, ResourceId, ResourceScope, SortOrder,
    SubscriptionError, SyncError, SyncResult,
};
pub use resync_storage::{CacheEntry, CacheStore, ResourceCollection, Revision};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// MOCK RESOURCE CLIENT
// ============================================================================

/// In-memory stand-in for a remote provider.
///
/// Holds the "server side" collection of every scope and answers List with
/// a snapshot of it. Failures, delays, and a gate that holds Lists until
/// released can be scripted per test.
#[derive(Debug, Default)]
pub struct MockResourceClient {
    remote: Mutex<HashMap<ResourceScope, HashMap<ResourceId, Value>>>,
    list_failures: Mutex<HashMap<ResourceScope, VecDeque<FetchError>>>,
    create_failures: Mutex<VecDeque<CreateError>>,
    list_delay: Mutex<Option<Duration>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    reflect_creates: AtomicBool,
    list_calls: AtomicUsize,
    lists_in_flight: AtomicUsize,
    create_calls: AtomicUsize,
    list_inputs: Mutex<Vec<ListInput>>,
    create_inputs: Mutex<Vec<CreateInput>>,
    ids: IdExtractor,
}

impl MockResourceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the remote collection of `scope`.
    ///
    /// # Panics
    ///
    /// If a resource carries no id under the default id fields.
    pub fn set_remote<I>(&self, scope: &ResourceScope, resources: I)
    where
        I: IntoIterator<Item = Value>,
    {
        let collection = resources
            .into_iter()
            .map(|resource| (self.id_of(&resource), resource))
            .collect();
        lock(&self.remote).insert(scope.clone(), collection);
    }

    /// Add or replace one remote resource.
    pub fn upsert_remote(&self, scope: &ResourceScope, resource: Value) {
        let id = self.id_of(&resource);
        lock(&self.remote)
            .entry(scope.clone())
            .or_default()
            .insert(id, resource);
    }

    /// Remove one remote resource. Returns true if it existed.
    pub fn remove_remote(&self, scope: &ResourceScope, id: &str) -> bool {
        lock(&self.remote)
            .get_mut(scope)
            .is_some_and(|resources| resources.remove(id).is_some())
    }

    /// Fail the next List of `scope` with `error`. Calls queue up.
    pub fn fail_next_list(&self, scope: &ResourceScope, error: FetchError) {
        lock(&self.list_failures)
            .entry(scope.clone())
            .or_default()
            .push_back(error);
    }

    /// Fail the next Create with `error`. Calls queue up.
    pub fn fail_next_create(&self, error: CreateError) {
        lock(&self.create_failures).push_back(error);
    }

    /// Delay every List response by `delay`.
    pub fn set_list_delay(&self, delay: Duration) {
        *lock(&self.list_delay) = Some(delay);
    }

    /// Hold every subsequent List after it has taken its snapshot until
    /// [`release_lists`](Self::release_lists) lets it through.
    pub fn hold_lists(&self) {
        *lock(&self.gate) = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `count` held Lists complete.
    pub fn release_lists(&self, count: usize) {
        if let Some(gate) = lock(&self.gate).as_ref() {
            gate.add_permits(count);
        }
    }

    /// Stop holding Lists, releasing every waiter.
    pub fn open_gate(&self) {
        if let Some(gate) = lock(&self.gate).take() {
            gate.close();
        }
    }

    /// Also add created resources to the remote collection, so a later
    /// List returns them.
    pub fn reflect_creates(&self, enabled: bool) {
        self.reflect_creates.store(enabled, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Lists that have started but not returned.
    pub fn lists_in_flight(&self) -> usize {
        self.lists_in_flight.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn list_inputs(&self) -> Vec<ListInput> {
        lock(&self.list_inputs).clone()
    }

    pub fn create_inputs(&self) -> Vec<CreateInput> {
        lock(&self.create_inputs).clone()
    }

    fn id_of(&self, resource: &Value) -> ResourceId {
        self.ids
            .extract(resource)
            .unwrap_or_else(|| panic!("Fixture resource has no id: {resource}"))
    }
}

#[async_trait]
impl ResourceClient for MockResourceClient {
    async fn list(
        &self,
        scope: &ResourceScope,
        input: &ListInput,
    ) -> Result<ListResult, FetchError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.lists_in_flight.fetch_add(1, Ordering::SeqCst);
        lock(&self.list_inputs).push(input.clone());

        let failure = lock(&self.list_failures)
            .get_mut(scope)
            .and_then(VecDeque::pop_front);
        let snapshot = lock(&self.remote).get(scope).cloned().unwrap_or_default();
        let gate = lock(&self.gate).clone();
        let delay = *lock(&self.list_delay);

        if let Some(gate) = gate {
            // A closed gate lets everyone through.
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.lists_in_flight.fetch_sub(1, Ordering::SeqCst);
        match failure {
            Some(error) => Err(error),
            None => Ok(ListResult::new(snapshot)),
        }
    }

    async fn create(
        &self,
        scope: &ResourceScope,
        input: &CreateInput,
    ) -> Result<Value, CreateError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.create_inputs).push(input.clone());

        let failure = lock(&self.create_failures).pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        let created = input.input.clone();
        if self.reflect_creates.load(Ordering::SeqCst) {
            if let Some(id) = self.ids.extract(&created) {
                lock(&self.remote)
                    .entry(scope.clone())
                    .or_default()
                    .insert(id, created.clone());
            }
        }
        Ok(created)
    }
}

// ============================================================================
// FLAKY EVENT TRANSPORT
// ============================================================================

/// Wraps an [`EventSubscriber`] and rejects subscriptions to chosen topics.
#[derive(Debug)]
pub struct FlakyEventBus<E> {
    inner: E,
    failing: Mutex<HashSet<String>>,
    rejected: AtomicUsize,
}

impl<E: EventSubscriber> FlakyEventBus<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
            rejected: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// Reject every future subscription to `topic`.
    pub fn fail_topic(&self, topic: impl Into<String>) {
        lock(&self.failing).insert(topic.into());
    }

    /// Reject the topic of `kind` under `scope`.
    pub fn fail_kind(&self, scope: &ResourceScope, kind: EventKind) {
        self.fail_topic(scope.topic(kind));
    }

    /// Accept every topic again.
    pub fn heal(&self) {
        lock(&self.failing).clear();
    }

    /// Number of subscriptions rejected so far.
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }
}

impl<E: EventSubscriber> EventSubscriber for FlakyEventBus<E> {
    fn subscribe(&self, topic: &str, handler: EventHandler) -> Result<(), SubscriptionError> {
        if lock(&self.failing).contains(topic) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(SubscriptionError::Rejected {
                topic: topic.to_string(),
                reason: "transport unavailable".to_string(),
            });
        }
        self.inner.subscribe(topic, handler)
    }

    fn unsubscribe(&self, topic: &str) {
        self.inner.unsubscribe(topic)
    }
}

// ============================================================================
// TRACING
// ============================================================================

/// Install a test-writer subscriber honoring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for informer traffic.

    use super::fixtures;
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    const POD_NAME_POOL: u8 = 6;

    /// Pod names from a small pool so sequences collide on ids.
    pub fn arb_pod_name() -> impl Strategy<Value = String> {
        (0..POD_NAME_POOL).prop_map(|n| format!("pod-{n}"))
    }

    pub fn arb_namespace() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("default".to_string()),
            Just("web".to_string()),
            Just("kube-system".to_string()),
        ]
    }

    pub fn arb_event_kind() -> impl Strategy<Value = EventKind> {
        prop_oneof![
            Just(EventKind::Add),
            Just(EventKind::Update),
            Just(EventKind::Delete),
        ]
    }

    /// One informer event against a pod.
    #[derive(Debug, Clone, PartialEq)]
    pub struct PodEvent {
        pub kind: EventKind,
        pub name: String,
        pub namespace: String,
        /// Distinguishes successive versions of the same pod.
        pub generation: u32,
    }

    impl PodEvent {
        /// The pod object this event carries.
        pub fn pod(&self) -> Value {
            fixtures::pod_with_generation(&self.name, &self.namespace, self.generation)
        }

        /// The raw payload a provider would publish on the event's topic.
        pub fn payload(&self, scope: &ResourceScope) -> Value {
            match self.kind {
                EventKind::Add => fixtures::add_payload(scope, &self.name, self.pod()),
                EventKind::Update => fixtures::update_payload(scope, &self.name, self.pod()),
                EventKind::Delete => fixtures::delete_payload(scope, &self.name, self.pod()),
            }
        }

        /// Apply this event to a reference model of the collection.
        pub fn apply_to(&self, model: &mut BTreeMap<String, Value>) {
            match self.kind {
                EventKind::Add | EventKind::Update => {
                    model.insert(self.name.clone(), self.pod());
                }
                EventKind::Delete => {
                    model.remove(&self.name);
                }
            }
        }
    }

    pub fn arb_pod_event() -> impl Strategy<Value = PodEvent> {
        (arb_event_kind(), arb_pod_name(), arb_namespace(), 0u32..1000).prop_map(
            |(kind, name, namespace, generation)| PodEvent {
                kind,
                name,
                namespace,
                generation,
            },
        )
    }

    pub fn arb_pod_events(max_len: usize) -> impl Strategy<Value = Vec<PodEvent>> {
        prop::collection::vec(arb_pod_event(), 0..=max_len)
    }

    /// Distinct pod names for an initial List.
    pub fn arb_pod_names(max_len: usize) -> impl Strategy<Value = Vec<String>> {
        let max_len = max_len.min(POD_NAME_POOL as usize);
        prop::collection::btree_set(arb_pod_name(), 0..=max_len)
            .prop_map(|names| names.into_iter().collect())
    }

    /// Fold `events` over an initial set of pods.
    pub fn expected_after(initial: &[String], events: &[PodEvent]) -> BTreeMap<String, Value> {
        let mut model: BTreeMap<String, Value> = initial
            .iter()
            .map(|name| (name.clone(), fixtures::pod(name)))
            .collect();
        for event in events {
            event.apply_to(&mut model);
        }
        model
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use serde_json::json;

    pub const PLUGIN_ID: &str = "kubernetes";
    pub const CONNECTION_ID: &str = "minikube";
    pub const PODS: &str = "core::v1::Pod";

    /// Pods in every namespace.
    pub fn pods_scope() -> ResourceScope {
        ResourceScope::all_namespaces(PLUGIN_ID, CONNECTION_ID, PODS)
    }

    /// Pods restricted to `namespaces`.
    pub fn pods_scope_in(namespaces: &[&str]) -> ResourceScope {
        ResourceScope::new(PLUGIN_ID, CONNECTION_ID, PODS, namespaces.iter().copied())
    }

    /// A pod in the `default` namespace.
    pub fn pod(name: &str) -> Value {
        pod_in(name, "default")
    }

    pub fn pod_in(name: &str, namespace: &str) -> Value {
        pod_with_generation(name, namespace, 0)
    }

    pub fn pod_with_generation(name: &str, namespace: &str, generation: u32) -> Value {
        json!({
            "metadata": {
                "name": name,
                "namespace": namespace,
                "generation": generation,
            },
            "status": { "phase": "Running" },
        })
    }

    /// Pods named `pod-1` through `pod-{count}`.
    pub fn numbered_pods(count: usize) -> Vec<Value> {
        (1..=count).map(|n| pod(&format!("pod-{n}"))).collect()
    }

    fn namespace_of(object: &Value) -> String {
        object
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// ADD topic payload for `object`.
    pub fn add_payload(scope: &ResourceScope, id: &str, object: Value) -> Value {
        json!({
            "key": scope.resource_kind(),
            "connection": scope.connection_id(),
            "id": id,
            "namespace": namespace_of(&object),
            "data": object,
        })
    }

    /// UPDATE topic payload replacing the object with `object`.
    pub fn update_payload(scope: &ResourceScope, id: &str, object: Value) -> Value {
        json!({
            "key": scope.resource_kind(),
            "connection": scope.connection_id(),
            "id": id,
            "namespace": namespace_of(&object),
            "oldData": Value::Null,
            "newData": object,
        })
    }

    /// DELETE topic payload for `object`.
    pub fn delete_payload(scope: &ResourceScope, id: &str, object: Value) -> Value {
        json!({
            "key": scope.resource_kind(),
            "connection": scope.connection_id(),
            "id": id,
            "namespace": namespace_of(&object),
            "data": object,
        })
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for cached collections and sync results.

    use super::*;

    /// Assert the collection holds exactly `expected` ids, in any order.
    #[track_caller]
    pub fn assert_ids(collection: &ResourceCollection, expected: &[&str]) {
        let mut actual: Vec<&str> = collection.entries().keys().map(String::as_str).collect();
        actual.sort_unstable();
        let mut expected = expected.to_vec();
        expected.sort_unstable();
        assert_eq!(actual, expected, "Cached ids mismatch");
    }

    /// Assert `scope` is cached with exactly `expected` ids.
    #[track_caller]
    pub fn assert_cached(store: &CacheStore, scope: &ResourceScope, expected: &[&str]) {
        match store.snapshot(scope) {
            Ok(Some(collection)) => assert_ids(&collection, expected),
            other => panic!("Expected {scope} to be cached, got: {other:?}"),
        }
    }

    /// Assert nothing is cached for `scope`.
    #[track_caller]
    pub fn assert_not_cached(store: &CacheStore, scope: &ResourceScope) {
        assert!(
            !store.contains_scope(scope),
            "Expected no cached collection for {scope}"
        );
    }

    /// Assert a result failed with a fetch error.
    #[track_caller]
    pub fn assert_fetch_error<T: std::fmt::Debug>(result: &SyncResult<T>) {
        match result {
            Err(SyncError::Fetch(_)) => {}
            other => panic!("Expected Fetch error, got: {other:?}"),
        }
    }

    /// Assert a result failed with a create error.
    #[track_caller]
    pub fn assert_create_error<T: std::fmt::Debug>(result: &SyncResult<T>) {
        match result {
            Err(SyncError::Create(_)) => {}
            other => panic!("Expected Create error, got: {other:?}"),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_lists_remote_snapshot() {
        let client = MockResourceClient::new();
        let scope = fixtures::pods_scope();
        client.set_remote(&scope, fixtures::numbered_pods(3));

        let list = client
            .list(&scope, &ListInput::for_scope(&scope))
            .await
            .unwrap();
        assert_eq!(list.len(), 3);
        assert!(list.result.contains_key("pod-2"));
        assert_eq!(client.list_calls(), 1);
        assert_eq!(client.lists_in_flight(), 0);

        let other = fixtures::pods_scope_in(&["web"]);
        assert!(client
            .list(&other, &ListInput::for_scope(&other))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_mock_scripted_list_failure_is_one_shot() {
        let client = MockResourceClient::new();
        let scope = fixtures::pods_scope();
        client.fail_next_list(
            &scope,
            FetchError::Network {
                reason: "connection reset".to_string(),
            },
        );

        let input = ListInput::for_scope(&scope);
        assert!(client.list(&scope, &input).await.is_err());
        assert!(client.list(&scope, &input).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_gate_holds_lists() {
        let client = Arc::new(MockResourceClient::new());
        let scope = fixtures::pods_scope();
        client.hold_lists();

        let task = {
            let client = Arc::clone(&client);
            let scope = scope.clone();
            tokio::spawn(async move { client.list(&scope, &ListInput::default()).await })
        };
        while client.lists_in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(!task.is_finished());

        client.release_lists(1);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_mock_create_echoes_and_reflects() {
        let client = MockResourceClient::new();
        let scope = fixtures::pods_scope();
        client.reflect_creates(true);

        let created = client
            .create(&scope, &CreateInput::new(fixtures::pod("pod-9")))
            .await
            .unwrap();
        assert_eq!(created["metadata"]["name"], "pod-9");
        assert_eq!(client.create_calls(), 1);

        let list = client.list(&scope, &ListInput::default()).await.unwrap();
        assert!(list.result.contains_key("pod-9"));

        client.fail_next_create(CreateError::Conflict {
            id: "pod-9".to_string(),
        });
        assert!(client
            .create(&scope, &CreateInput::new(json!({})))
            .await
            .is_err());
    }

    #[test]
    fn test_remote_mutation() {
        let client = MockResourceClient::new();
        let scope = fixtures::pods_scope();
        client.upsert_remote(&scope, fixtures::pod("pod-1"));
        assert!(client.remove_remote(&scope, "pod-1"));
        assert!(!client.remove_remote(&scope, "pod-1"));
    }

    #[derive(Default)]
    struct Recording {
        topics: Mutex<Vec<String>>,
    }

    impl EventSubscriber for Recording {
        fn subscribe(&self, topic: &str, _handler: EventHandler) -> Result<(), SubscriptionError> {
            lock(&self.topics).push(topic.to_string());
            Ok(())
        }

        fn unsubscribe(&self, _topic: &str) {}
    }

    #[test]
    fn test_flaky_bus_rejects_chosen_topics() {
        let bus = FlakyEventBus::new(Recording::default());
        let scope = fixtures::pods_scope();
        bus.fail_kind(&scope, EventKind::Delete);

        let handler: EventHandler = Arc::new(|_: Value| {});
        assert!(bus
            .subscribe(&scope.topic(EventKind::Add), Arc::clone(&handler))
            .is_ok());
        assert!(matches!(
            bus.subscribe(&scope.topic(EventKind::Delete), Arc::clone(&handler)),
            Err(SubscriptionError::Rejected { .. })
        ));
        assert_eq!(bus.rejected(), 1);
        assert_eq!(lock(&bus.inner().topics).len(), 1);

        bus.heal();
        assert!(bus
            .subscribe(&scope.topic(EventKind::Delete), handler)
            .is_ok());
    }

    #[test]
    fn test_payload_fixtures_carry_origin() {
        let scope = fixtures::pods_scope();
        let add = fixtures::add_payload(&scope, "pod-1", fixtures::pod_in("pod-1", "web"));
        assert_eq!(add["key"], fixtures::PODS);
        assert_eq!(add["connection"], fixtures::CONNECTION_ID);
        assert_eq!(add["namespace"], "web");

        let update = fixtures::update_payload(&scope, "pod-1", fixtures::pod("pod-1"));
        assert_eq!(update["newData"]["metadata"]["name"], "pod-1");
    }

    #[test]
    fn test_expected_after_folds_events() {
        use generators::{expected_after, PodEvent};

        let events = vec![
            PodEvent {
                kind: EventKind::Add,
                name: "pod-3".to_string(),
                namespace: "default".to_string(),
                generation: 1,
            },
            PodEvent {
                kind: EventKind::Delete,
                name: "pod-1".to_string(),
                namespace: "default".to_string(),
                generation: 0,
            },
        ];
        let model = expected_after(&["pod-1".to_string(), "pod-2".to_string()], &events);
        assert_eq!(
            model.keys().cloned().collect::<Vec<_>>(),
            vec!["pod-2", "pod-3"]
        );
    }
}
