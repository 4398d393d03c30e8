//! RESYNC Core - Data Types and Collaborator Contracts
//!
//! Pure data structures shared by every other crate: resource scopes, the
//! informer event model, id extraction, ordering, configuration, errors,
//! and the traits for the two external collaborators (the remote resource
//! client and the push-event transport).

pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod order;
pub mod scope;

pub use client::{
    CreateInput, EventHandler, EventSubscriber, ListInput, ListResult, Pagination,
    ResourceClient, DEFAULT_PAGE_SIZE,
};
pub use config::SyncConfig;
pub use error::{
    ConfigError, CreateError, EventError, FetchError, StoreError, SubscriptionError, SyncError,
    SyncResult,
};
pub use event::{
    AddPayload, Change, DeletePayload, EventKind, EventOrigin, ResourceEvent, UpdatePayload,
};
pub use identity::{
    display_name, IdAccessor, IdExtractor, IdExtractorRegistry, IdStrategy, ResourceId,
    DEFAULT_ID_FIELDS,
};
pub use order::{SortKey, SortOrder};
pub use scope::ResourceScope;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Identifier of one observation lease, UUIDv7 so leases sort by creation.
pub type LeaseId = Uuid;

/// Generate a new UUIDv7 lease id.
pub fn new_lease_id() -> LeaseId {
    Uuid::now_v7()
}
