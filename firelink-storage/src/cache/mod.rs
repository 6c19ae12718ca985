//! Cache layer with write-through consistency.
//!
//! [`CachedAccessor`] sits between callers and a [`BackingStore`](crate::BackingStore).
//! Reads may be answered from a local [`CacheStore`]; writes and deletes are
//! committed to the backing store first and mirrored locally afterwards, so a
//! failed write never leaves the cache ahead of the database.
//!
//! # Hierarchy
//!
//! The database is a tree, and the value at a key is its whole subtree. A
//! cached entry therefore covers every key below it:
//!
//! - a read of `a/b` can be answered from a cached `a`, and a missing `b`
//!   inside it is an authoritative "not found";
//! - writing or deleting `a/b` is applied inside any cached `a` and drops
//!   anything cached below `a/b`.
//!
//! # Example
//!
//! ```ignore
//! let accessor = CachedAccessor::new(store, RootPath::parse("users/u1")?, CacheConfig::default());
//!
//! accessor.update("profile", json!({ "name": "John" })).await?;
//!
//! let read = accessor.read_with_origin("profile/name").await?;
//! assert!(read.map_or(false, |r| r.was_cache_hit()));
//! ```

pub mod accessor;
pub mod read;
pub mod store;

pub use accessor::{CacheConfig, CachedAccessor};
pub use read::{CacheRead, ReadOrigin};
pub use store::{CacheEntry, CacheLookup, CacheStats, CacheStore};
