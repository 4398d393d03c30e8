//! Lease lifecycle: buffering during the initial List, late responses,
//! degraded subscriptions, timeouts, and concurrent observers.

use resync_informer::{EventKind, LeaseStatus, SyncConfig, SyncError};
use resync_test_utils::assertions::{assert_cached, assert_fetch_error, assert_not_cached};
use resync_test_utils::{fixtures, FetchError};
use std::time::Duration;

#[path = "support/sync.rs"]
mod test_sync_support;
use test_sync_support::{flaky_harness, harness, harness_with, wait_until};

#[tokio::test]
async fn test_events_during_initial_list_are_replayed() {
    let h = harness();
    let scope = fixtures::pods_scope();
    h.client.set_remote(&scope, fixtures::numbered_pods(3));
    h.client.hold_lists();

    let handle = h
        .sync
        .begin_observe(scope.clone(), h.sync.default_list_input(&scope));
    assert_eq!(handle.status(), LeaseStatus::Loading);
    wait_until("the List to start", || h.client.lists_in_flight() == 1).await;

    h.bus.publish_event(
        &scope,
        EventKind::Add,
        fixtures::add_payload(&scope, "pod-4", fixtures::pod("pod-4")),
    );
    h.bus.publish_event(
        &scope,
        EventKind::Delete,
        fixtures::delete_payload(&scope, "pod-1", fixtures::pod("pod-1")),
    );
    assert_not_cached(h.sync.store(), &scope);
    assert_eq!(h.sync.stats().events_buffered, 2);

    h.client.release_lists(1);
    handle.ready().await.unwrap();

    assert_cached(h.sync.store(), &scope, &["pod-2", "pod-3", "pod-4"]);
}

#[tokio::test]
async fn test_late_list_after_stop_is_discarded() {
    let h = harness();
    let scope = fixtures::pods_scope();
    h.client.set_remote(&scope, fixtures::numbered_pods(2));
    h.client.hold_lists();

    let handle = h
        .sync
        .begin_observe(scope.clone(), h.sync.default_list_input(&scope));
    wait_until("the List to start", || h.client.lists_in_flight() == 1).await;
    h.sync.stop_observing(handle);

    assert!(!h.sync.is_observing(&scope));
    assert_eq!(h.bus.topic_count(), 0);

    h.client.release_lists(1);
    wait_until("the late List to be discarded", || {
        h.sync.stats().lists_discarded == 1
    })
    .await;
    assert_not_cached(h.sync.store(), &scope);
}

#[tokio::test]
async fn test_late_list_does_not_clobber_successor() {
    let h = harness();
    let scope = fixtures::pods_scope();
    h.client.set_remote(&scope, fixtures::numbered_pods(2));
    h.client.hold_lists();

    let stale = h
        .sync
        .begin_observe(scope.clone(), h.sync.default_list_input(&scope));
    wait_until("the first List to start", || h.client.lists_in_flight() == 1).await;
    h.sync.stop_observing(stale);

    h.client.set_remote(&scope, vec![fixtures::pod("pod-7")]);
    let fresh = h
        .sync
        .begin_observe(scope.clone(), h.sync.default_list_input(&scope));
    wait_until("the second List to start", || h.client.lists_in_flight() == 2).await;

    h.client.release_lists(2);
    fresh.ready().await.unwrap();
    wait_until("the stale List to be discarded", || {
        h.sync.stats().lists_discarded == 1
    })
    .await;

    assert_cached(h.sync.store(), &scope, &["pod-7"]);
    assert_eq!(fresh.status(), LeaseStatus::Live);
}

#[tokio::test]
async fn test_events_after_stop_are_ignored() {
    let h = harness();
    let scope = fixtures::pods_scope();
    let handle = h
        .sync
        .observe(scope.clone(), h.sync.default_list_input(&scope))
        .await
        .unwrap();
    h.sync.stop_observing(handle);

    let delivered = h.bus.publish_event(
        &scope,
        EventKind::Add,
        fixtures::add_payload(&scope, "pod-1", fixtures::pod("pod-1")),
    );

    assert!(!delivered);
    assert_not_cached(h.sync.store(), &scope);
}

#[tokio::test]
async fn test_waiters_share_initial_failure() {
    let h = harness();
    let scope = fixtures::pods_scope();
    h.client.hold_lists();
    h.client.fail_next_list(
        &scope,
        FetchError::NotFound {
            resource_kind: fixtures::PODS.to_string(),
        },
    );

    let first = h
        .sync
        .begin_observe(scope.clone(), h.sync.default_list_input(&scope));
    let second = h
        .sync
        .begin_observe(scope.clone(), h.sync.default_list_input(&scope));
    assert_eq!(first.id(), second.id());

    h.client.release_lists(1);
    let first_result = first.ready().await;
    let second_result = second.ready().await;

    assert_fetch_error(&first_result);
    assert_eq!(first_result, second_result);
    assert!(matches!(first.status(), LeaseStatus::Failed(_)));
    assert_eq!(h.sync.lease_count(), 0);
    assert_eq!(h.client.list_calls(), 1);

    // Releasing handles of a failed lease is harmless.
    h.sync.stop_observing(first);
    h.sync.stop_observing(second);
}

#[tokio::test]
async fn test_list_timeout_tears_down() {
    let h = harness_with(SyncConfig::default().with_list_timeout(Duration::from_millis(20)));
    let scope = fixtures::pods_scope();
    h.client.set_list_delay(Duration::from_secs(10));

    let result = h
        .sync
        .observe(scope.clone(), h.sync.default_list_input(&scope))
        .await;

    assert!(matches!(
        result,
        Err(SyncError::Fetch(FetchError::Timeout { timeout_ms: 20 }))
    ));
    assert_not_cached(h.sync.store(), &scope);
    assert_eq!(h.bus.topic_count(), 0);
}

#[tokio::test]
async fn test_partial_subscription_failure_leaves_nothing_subscribed() {
    let h = flaky_harness();
    let scope = fixtures::pods_scope();
    h.client.set_remote(&scope, fixtures::numbered_pods(2));
    h.flaky.fail_kind(&scope, EventKind::Delete);

    let handle = h
        .sync
        .observe(scope.clone(), h.sync.default_list_input(&scope))
        .await
        .unwrap();

    assert!(matches!(handle.status(), LeaseStatus::Degraded(_)));
    assert_eq!(h.bus.topic_count(), 0);
    assert_eq!(h.flaky.rejected(), 1);
    assert_eq!(h.sync.stats().subscription_failures, 1);
    assert_cached(h.sync.store(), &scope, &["pod-1", "pod-2"]);

    // Degraded leases still pick up changes through refresh.
    h.client.upsert_remote(&scope, fixtures::pod("pod-3"));
    h.sync.refresh(&handle).await.unwrap();
    assert_cached(h.sync.store(), &scope, &["pod-1", "pod-2", "pod-3"]);
    assert!(matches!(handle.status(), LeaseStatus::Degraded(_)));

    h.sync.stop_observing(handle);
    assert_not_cached(h.sync.store(), &scope);
}

#[tokio::test]
async fn test_refresh_failure_keeps_collection() {
    let h = harness();
    let scope = fixtures::pods_scope();
    h.client.set_remote(&scope, fixtures::numbered_pods(2));
    let handle = h
        .sync
        .observe(scope.clone(), h.sync.default_list_input(&scope))
        .await
        .unwrap();

    h.client.fail_next_list(
        &scope,
        FetchError::Network {
            reason: "connection reset".to_string(),
        },
    );
    let result = h.sync.refresh(&handle).await;

    assert_fetch_error(&result);
    assert_eq!(handle.status(), LeaseStatus::Live);
    assert_cached(h.sync.store(), &scope, &["pod-1", "pod-2"]);

    // Events flow again once the failed refresh is over.
    h.bus.publish_event(
        &scope,
        EventKind::Add,
        fixtures::add_payload(&scope, "pod-3", fixtures::pod("pod-3")),
    );
    assert_cached(h.sync.store(), &scope, &["pod-1", "pod-2", "pod-3"]);
}

#[tokio::test]
async fn test_list_input_carries_scope_and_config() {
    let h = harness_with(SyncConfig::default().with_page_size(25));
    let scope = fixtures::pods_scope_in(&["web", "default"]);

    let _handle = h
        .sync
        .observe(scope.clone(), h.sync.default_list_input(&scope))
        .await
        .unwrap();

    let inputs = h.client.list_inputs();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].pagination.page_size, 25);
    assert_eq!(inputs[0].namespaces, *scope.namespaces());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_observers_share_one_lease() {
    let h = harness();
    let scope = fixtures::pods_scope();
    h.client.set_remote(&scope, fixtures::numbered_pods(5));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let sync = h.sync.clone();
        let scope = scope.clone();
        tasks.push(tokio::spawn(async move {
            let input = sync.default_list_input(&scope);
            let handle = sync.observe(scope, input).await.unwrap();
            handle.id()
        }));
    }
    let mut ids: Vec<_> = futures_util::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();
    ids.dedup();

    assert_eq!(ids.len(), 1);
    assert_eq!(h.client.list_calls(), 1);
    assert_eq!(h.sync.lease_count(), 1);
    assert_cached(
        h.sync.store(),
        &scope,
        &["pod-1", "pod-2", "pod-3", "pod-4", "pod-5"],
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_events_and_observe_cycles() {
    let h = harness();
    let scope = fixtures::pods_scope();
    let keeper = h
        .sync
        .observe(scope.clone(), h.sync.default_list_input(&scope))
        .await
        .unwrap();

    let publisher = {
        let bus = std::sync::Arc::clone(&h.bus);
        let scope = scope.clone();
        tokio::spawn(async move {
            for n in 0..200 {
                let name = format!("pod-{n}");
                bus.publish_event(
                    &scope,
                    EventKind::Add,
                    fixtures::add_payload(&scope, &name, fixtures::pod(&name)),
                );
                tokio::task::yield_now().await;
            }
        })
    };
    let cycler = {
        let sync = h.sync.clone();
        let scope = scope.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                let input = sync.default_list_input(&scope);
                let handle = sync.observe(scope.clone(), input).await.unwrap();
                sync.stop_observing(handle);
            }
        })
    };
    publisher.await.unwrap();
    cycler.await.unwrap();

    assert_eq!(h.sync.lease_count(), 1);
    assert_eq!(h.sync.snapshot(&scope).unwrap().unwrap().len(), 200);
    h.sync.stop_observing(keeper);
    assert_eq!(h.bus.topic_count(), 0);
}
