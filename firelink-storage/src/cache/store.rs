//! The local mirror of backing-store values.
//!
//! Entries are keyed by absolute key. Because the backing store is
//! hierarchical, an entry at `a` also describes everything below `a`. A
//! committed mutation at `a/b` is written into a cached `a` and drops any
//! entries cached below `a/b`.

use chrono::{DateTime, Utc};
use firelink_core::{AbsoluteKey, CacheError, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

/// A cached value and when it was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: Value,
    pub cached_at: DateTime<Utc>,
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Nothing cached covers the key.
    Miss,
    /// The key's value, either cached directly or found inside a cached
    /// ancestor.
    Present {
        value: Value,
        cached_at: DateTime<Utc>,
    },
    /// A cached ancestor covers the key and holds nothing there.
    Absent { cached_at: DateTime<Utc> },
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups answered locally (including authoritative "absent").
    pub hits: u64,
    /// Lookups that had to go to the backing store.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Entries dropped because a write or delete overlapped them.
    pub invalidations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    invalidations: u64,
    /// Bumped by every local mutation.
    generation: u64,
}

impl Inner {
    /// Drop strict descendants of `key`. Returns how many were dropped.
    fn drop_descendants(&mut self, key: &AbsoluteKey) -> usize {
        let prefix = key.descendant_prefix();
        let doomed: Vec<String> = self
            .entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| k.as_str() != key.as_str())
            .map(|(k, _)| k.clone())
            .collect();
        for k in &doomed {
            self.entries.remove(k);
        }
        doomed.len()
    }

    /// Drop strict ancestors of `key`. Returns how many were dropped.
    fn drop_ancestors(&mut self, key: &AbsoluteKey) -> usize {
        key.ancestors()
            .iter()
            .filter(|a| self.entries.remove(a.as_str()).is_some())
            .count()
    }

    /// Apply `edit` to every cached strict ancestor of `key`, handing it the
    /// segments of `key` below that ancestor. Returns how many were patched.
    fn patch_ancestors<F>(&mut self, key: &AbsoluteKey, mut edit: F) -> usize
    where
        F: FnMut(&mut Value, &[&str]),
    {
        let mut patched = 0;
        for ancestor in key.ancestors() {
            let Some(entry) = self.entries.get_mut(ancestor.as_str()) else {
                continue;
            };
            let Some(rest) = key.strip_prefix(&ancestor) else {
                continue;
            };
            edit(&mut entry.value, &rest);
            entry.cached_at = Utc::now();
            patched += 1;
        }
        if patched > 0 {
            trace!(key = %key, patched, "Patched cached ancestors");
        }
        patched
    }

    fn insert(&mut self, key: &AbsoluteKey, value: Value) {
        self.entries.insert(
            key.as_str().to_string(),
            CacheEntry {
                value,
                cached_at: Utc::now(),
            },
        );
    }

    fn drop_subtree(&mut self, key: &AbsoluteKey) -> usize {
        let dropped = self.drop_descendants(key);
        self.invalidations += dropped as u64;
        if dropped > 0 {
            trace!(key = %key, dropped, "Dropped cached descendants");
        }
        dropped
    }

    fn drop_overlapping(&mut self, key: &AbsoluteKey) -> usize {
        let dropped = self.drop_descendants(key) + self.drop_ancestors(key);
        self.invalidations += dropped as u64;
        if dropped > 0 {
            trace!(key = %key, dropped, "Dropped overlapping cache entries");
        }
        dropped
    }
}

/// In-process mapping from absolute key to last known value.
///
/// Unbounded: there is no eviction, TTL or size limit. The lock is only held
/// for the duration of a single map operation.
#[derive(Debug, Default)]
pub struct CacheStore {
    inner: RwLock<Inner>,
}

impl CacheStore {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, CacheError> {
        self.inner.read().map_err(|_| CacheError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, CacheError> {
        self.inner.write().map_err(|_| CacheError::LockPoisoned)
    }

    /// Look up `key`, counting the hit or miss.
    ///
    /// With `include_ancestors`, a miss on `key` itself falls back to the
    /// nearest cached ancestor and walks into its value.
    pub fn lookup(
        &self,
        key: &AbsoluteKey,
        include_ancestors: bool,
    ) -> Result<CacheLookup, CacheError> {
        let mut inner = self.write()?;

        let mut found = inner
            .entries
            .get(key.as_str())
            .map(|entry| CacheLookup::Present {
                value: entry.value.clone(),
                cached_at: entry.cached_at,
            });

        if found.is_none() && include_ancestors {
            found = key.ancestors().iter().find_map(|ancestor| {
                let entry = inner.entries.get(ancestor.as_str())?;
                let rest = key.strip_prefix(ancestor)?;
                Some(match entry.value.descend(rest) {
                    Some(value) => CacheLookup::Present {
                        value: value.clone(),
                        cached_at: entry.cached_at,
                    },
                    None => CacheLookup::Absent {
                        cached_at: entry.cached_at,
                    },
                })
            });
        }

        match found {
            Some(lookup) => {
                inner.hits += 1;
                Ok(lookup)
            }
            None => {
                inner.misses += 1;
                Ok(CacheLookup::Miss)
            }
        }
    }

    /// Current write generation.
    ///
    /// Take it before fetching from the backing store and hand it to
    /// [`populate`](Self::populate) afterwards.
    pub fn generation(&self) -> Result<u64, CacheError> {
        Ok(self.read()?.generation)
    }

    /// Record a value fetched from the backing store.
    ///
    /// `since` is the generation taken before the fetch. If any local write,
    /// delete or invalidation happened in between, the fetched value may
    /// predate it and is not cached. Returns true if the value was cached.
    ///
    /// Cached descendants are dropped since `value` already covers them.
    pub fn populate(
        &self,
        key: &AbsoluteKey,
        value: Value,
        since: u64,
    ) -> Result<bool, CacheError> {
        let mut inner = self.write()?;
        if inner.generation != since {
            trace!(key = %key, "Skipped populate after concurrent mutation");
            return Ok(false);
        }
        inner.drop_descendants(key);
        inner.insert(key, value);
        Ok(true)
    }

    /// Mirror a committed write.
    ///
    /// `key` is set, cached descendants are dropped, and cached ancestors get
    /// `value` written into their subtree the way the database applies it.
    pub fn write_through(&self, key: &AbsoluteKey, value: Value) -> Result<(), CacheError> {
        let mut inner = self.write()?;
        inner.generation += 1;
        inner.drop_subtree(key);
        inner.patch_ancestors(key, |ancestor, rest| ancestor.set_at(rest, value.clone()));
        inner.insert(key, value);
        Ok(())
    }

    /// Mirror a committed delete.
    ///
    /// `key` and its cached descendants are dropped and the subtree is
    /// removed from cached ancestors. Returns true if `key` itself was
    /// cached. Removing an absent key is a no-op.
    pub fn remove(&self, key: &AbsoluteKey) -> Result<bool, CacheError> {
        let mut inner = self.write()?;
        inner.generation += 1;
        inner.drop_subtree(key);
        inner.patch_ancestors(key, |ancestor, rest| {
            ancestor.remove_at(rest);
        });
        Ok(inner.entries.remove(key.as_str()).is_some())
    }

    /// Drop `key` and everything overlapping it, ancestors included.
    /// Returns the number of entries dropped.
    pub fn invalidate(&self, key: &AbsoluteKey) -> Result<usize, CacheError> {
        let mut inner = self.write()?;
        inner.generation += 1;
        let own = usize::from(inner.entries.remove(key.as_str()).is_some());
        inner.invalidations += own as u64;
        Ok(own + inner.drop_overlapping(key))
    }

    /// Drop every entry. Returns the number dropped.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut inner = self.write()?;
        inner.generation += 1;
        let count = inner.entries.len();
        inner.entries.clear();
        inner.invalidations += count as u64;
        Ok(count)
    }

    /// The entry stored exactly at `key`, without touching statistics.
    pub fn entry(&self, key: &AbsoluteKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.read()?.entries.get(key.as_str()).cloned())
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &AbsoluteKey) -> Result<bool, CacheError> {
        Ok(self.read()?.entries.contains_key(key.as_str()))
    }

    pub fn len(&self) -> Result<usize, CacheError> {
        Ok(self.read()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.read()?.entries.is_empty())
    }

    /// Keys with a direct entry, in order.
    #[cfg(test)]
    pub(crate) fn keys(&self) -> Result<Vec<AbsoluteKey>, CacheError> {
        Ok(self
            .read()?
            .entries
            .keys()
            .filter_map(|k| AbsoluteKey::parse(k).ok())
            .collect())
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let inner = self.read()?;
        Ok(CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entry_count: inner.entries.len() as u64,
            invalidations: inner.invalidations,
        })
    }
}
