//! Firelink Storage - Backing-Store Traits and Cached Accessor
//!
//! Defines the capability interface a database client must provide, the
//! write-through cache layered on top of it, and an in-process reference
//! store for tests and local development.

pub mod backing;
pub mod cache;
pub mod memory;

pub use backing::{BackingStore, ChangeEvent, ChangeFeed, ChangeStream, ConnectTarget, Connector};

pub use cache::{
    CacheConfig, CacheEntry, CacheLookup, CacheRead, CacheStats, CacheStore, CachedAccessor,
    ReadOrigin,
};

pub use memory::{MemoryConnector, MemoryStore, StoreCallCounts};
