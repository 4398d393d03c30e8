#![allow(dead_code)]

use resync_informer::{InMemoryEventBus, SyncConfig, Synchronizer};
use resync_test_utils::{FlakyEventBus, MockResourceClient};
use std::sync::Arc;
use std::time::Duration;

pub type TestSync = Synchronizer<Arc<MockResourceClient>, Arc<InMemoryEventBus>>;
pub type FlakyBus = FlakyEventBus<Arc<InMemoryEventBus>>;
pub type FlakySync = Synchronizer<Arc<MockResourceClient>, Arc<FlakyBus>>;

pub struct Harness {
    pub client: Arc<MockResourceClient>,
    pub bus: Arc<InMemoryEventBus>,
    pub sync: TestSync,
}

pub fn harness() -> Harness {
    harness_with(SyncConfig::default())
}

pub fn harness_with(config: SyncConfig) -> Harness {
    resync_test_utils::init_test_tracing();
    let client = Arc::new(MockResourceClient::new());
    let bus = Arc::new(InMemoryEventBus::new());
    let sync = Synchronizer::builder(Arc::clone(&client), Arc::clone(&bus))
        .with_config(config)
        .build();
    Harness { client, bus, sync }
}

pub struct FlakyHarness {
    pub client: Arc<MockResourceClient>,
    pub bus: Arc<InMemoryEventBus>,
    pub flaky: Arc<FlakyBus>,
    pub sync: FlakySync,
}

pub fn flaky_harness() -> FlakyHarness {
    resync_test_utils::init_test_tracing();
    let client = Arc::new(MockResourceClient::new());
    let bus = Arc::new(InMemoryEventBus::new());
    let flaky = Arc::new(FlakyEventBus::new(Arc::clone(&bus)));
    let sync = Synchronizer::new(Arc::clone(&client), Arc::clone(&flaky));
    FlakyHarness {
        client,
        bus,
        flaky,
        sync,
    }
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let polled = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "Timed out waiting for {what}");
}
