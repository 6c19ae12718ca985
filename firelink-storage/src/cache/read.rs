//! Read results annotated with where they came from.

use chrono::{DateTime, Utc};
use firelink_core::AbsoluteKey;
use std::time::Duration;

/// Where a read was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOrigin {
    /// Served from the local mirror without a store round trip.
    Cache,
    /// Fetched from the backing store.
    Store,
}

/// Result of an accessor read, carrying provenance metadata.
///
/// Callers that only want the data use [`into_value`](Self::into_value);
/// the rest is there for diagnostics and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    value: T,
    /// Absolute key the read resolved to.
    key: AbsoluteKey,
    /// When the value was cached (or fetched from the store).
    cached_at: DateTime<Utc>,
    origin: ReadOrigin,
}

impl<T> CacheRead<T> {
    /// A read answered by the cache.
    pub fn from_cache(value: T, key: AbsoluteKey, cached_at: DateTime<Utc>) -> Self {
        Self {
            value,
            key,
            cached_at,
            origin: ReadOrigin::Cache,
        }
    }

    /// A read answered by the backing store.
    pub fn from_store(value: T, key: AbsoluteKey) -> Self {
        Self {
            value,
            key,
            cached_at: Utc::now(),
            origin: ReadOrigin::Store,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn key(&self) -> &AbsoluteKey {
        &self.key
    }

    pub fn origin(&self) -> ReadOrigin {
        self.origin
    }

    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    pub fn was_cache_hit(&self) -> bool {
        self.origin == ReadOrigin::Cache
    }

    pub fn was_cache_miss(&self) -> bool {
        self.origin == ReadOrigin::Store
    }

    /// Time elapsed since the value was cached or fetched.
    pub fn staleness(&self) -> Duration {
        (Utc::now() - self.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            key: self.key,
            cached_at: self.cached_at,
            origin: self.origin,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
