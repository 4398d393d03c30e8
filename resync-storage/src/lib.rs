//! RESYNC Storage - Partitioned Resource Cache
//!
//! Holds the cached collection of every observed scope and applies
//! List and event mutations atomically with respect to concurrent reads.
//! Nothing here performs I/O; the informer layer feeds the store.

pub mod cache;

pub use cache::{
    CacheEntry, CacheStore, MutationOutcome, ResourceCollection, Revision, StoreStats,
};
