//! In-memory resource cache.
//!
//! One [`ResourceCollection`] per [`ResourceScope`](resync_core::ResourceScope),
//! held in a [`CacheStore`]. Every mutation comes from a server-confirmed
//! List response or push event; the store never invents state.
//!
//! # Example
//!
//! ```ignore
//! let store = CacheStore::new();
//! store.initialize(&scope, ResourceCollection::from_list(scope.clone(), list))?;
//! store.apply_add(&scope, "pod-4".into(), payload)?;
//!
//! let snapshot = store.snapshot(&scope)?.expect("initialized");
//! for entry in snapshot.sorted(&SortOrder::default()) {
//!     println!("{}", entry.id);
//! }
//! ```

pub mod collection;
pub mod revision;
pub mod stats;
pub mod store;

pub use collection::{CacheEntry, ResourceCollection};
pub use revision::Revision;
pub use stats::StoreStats;
pub use store::{CacheStore, MutationOutcome};
