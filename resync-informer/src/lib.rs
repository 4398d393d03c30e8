//! RESYNC Informer - List-then-Watch Synchronization Layer
//!
//! Keeps locally cached resource collections in step with a remote
//! provider: one bulk List per observed scope, then the ADD/UPDATE/DELETE
//! event stream applied on top. Consumers read deterministic, immutable
//! snapshots through [`ResourceView`].

pub mod bus;
pub mod lease;
mod router;
pub mod stats;
pub mod synchronizer;
pub mod telemetry;
pub mod view;

// Re-export commonly used types
pub use bus::InMemoryEventBus;
pub use lease::{LeaseHandle, LeaseStatus};
pub use stats::SyncStats;
pub use synchronizer::{Synchronizer, SynchronizerBuilder};
pub use telemetry::{init_tracing, TelemetryConfig, TelemetryError};
pub use view::{ResourceView, Resources, ViewOptions};

pub use resync_core::{
    CreateError, EventKind, EventSubscriber, FetchError, IdExtractor, IdExtractorRegistry,
    ListInput, ResourceClient, ResourceScope, SortKey, SortOrder, SubscriptionError, SyncConfig,
    SyncError, SyncResult,
};
pub use resync_storage::{CacheEntry, CacheStore, ResourceCollection, Revision};
