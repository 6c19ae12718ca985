//! Write-through cached accessor.
//!
//! Reads are routed through the local mirror when caching is on; every write
//! goes to the backing store first and only touches the mirror once the store
//! has accepted it.

use std::sync::Arc;

use firelink_core::{AbsoluteKey, AccessorConfig, FirelinkResult, RootPath, Value};
use tracing::{debug, info, warn};

use super::read::CacheRead;
use super::store::{CacheLookup, CacheStats, CacheStore};
use crate::backing::{BackingStore, ChangeFeed, ChangeStream, ConnectTarget, Connector};

/// Configuration for the accessor's cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Whether reads may be served locally at all.
    pub enabled: bool,
    /// Whether a cached ancestor may answer reads for keys below it.
    pub serve_from_ancestors: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            serve_from_ancestors: true,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// A config under which every read goes to the backing store.
    pub fn disabled() -> Self {
        Self::new().with_caching(false)
    }

    /// Enable or disable caching.
    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Enable or disable answering reads from cached ancestors.
    pub fn with_ancestor_reads(mut self, enabled: bool) -> Self {
        self.serve_from_ancestors = enabled;
        self
    }
}

impl From<&AccessorConfig> for CacheConfig {
    fn from(config: &AccessorConfig) -> Self {
        Self::new().with_caching(config.caching_enabled)
    }
}

/// Root-scoped read/update/delete facade over a backing store.
///
/// Keys passed to every operation are relative to the accessor's root. The
/// cache is owned by this accessor alone; writes made through other handles
/// to the same database are not observed.
///
/// # Example
///
/// ```ignore
/// let accessor = CachedAccessor::connect(&connector, &config).await?;
/// accessor.update("name", "John Doe").await?;
///
/// // Served from the cache, no backing-store call.
/// let name = accessor.read("name").await?;
/// ```
pub struct CachedAccessor<B>
where
    B: BackingStore + ?Sized,
{
    store: Arc<B>,
    root: RootPath,
    config: CacheConfig,
    cache: CacheStore,
}

impl<B> CachedAccessor<B>
where
    B: BackingStore,
{
    /// Authenticate through `connector` and build an accessor from `config`.
    ///
    /// The root is parsed and bound before any connection attempt.
    pub async fn connect<C>(connector: &C, config: &AccessorConfig) -> FirelinkResult<Self>
    where
        C: Connector<Store = B>,
    {
        let root = config.root()?;
        let target = ConnectTarget::from(config);
        let store = connector.connect(&target).await.map_err(|e| {
            warn!(url = %target.database_url, error = %e, "Connection failed");
            e
        })?;
        info!(
            url = %target.database_url,
            root = %root,
            caching = config.caching_enabled,
            "Connected accessor"
        );
        Ok(Self::new(Arc::new(store), root, CacheConfig::from(config)))
    }
}

impl<B> CachedAccessor<B>
where
    B: BackingStore + ?Sized,
{
    /// Create an accessor over an already-open connection.
    pub fn new(store: Arc<B>, root: RootPath, config: CacheConfig) -> Self {
        Self {
            store,
            root,
            config,
            cache: CacheStore::new(),
        }
    }

    /// Get a reference to the backing store.
    pub fn store(&self) -> &Arc<B> {
        &self.store
    }

    pub fn root(&self) -> &RootPath {
        &self.root
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn caching_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Resolve a relative key against this accessor's root.
    pub fn resolve(&self, key: &str) -> FirelinkResult<AbsoluteKey> {
        Ok(self.root.resolve(key)?)
    }

    /// Read the value at `key`.
    ///
    /// Returns `Ok(None)` when nothing is stored there.
    pub async fn read(&self, key: &str) -> FirelinkResult<Option<Value>> {
        Ok(self.read_with_origin(key).await?.map(CacheRead::into_value))
    }

    /// Read the value at `key`, reporting whether the cache answered.
    pub async fn read_with_origin(&self, key: &str) -> FirelinkResult<Option<CacheRead<Value>>> {
        let key = self.resolve(key)?;

        if self.config.enabled {
            match self.cache.lookup(&key, self.config.serve_from_ancestors)? {
                CacheLookup::Present { value, cached_at } => {
                    debug!(key = %key, "Cache hit");
                    return Ok(Some(CacheRead::from_cache(value, key, cached_at)));
                }
                CacheLookup::Absent { .. } => {
                    debug!(key = %key, "Cache hit, absent under cached ancestor");
                    return Ok(None);
                }
                CacheLookup::Miss => debug!(key = %key, "Cache miss"),
            }
        }

        let since = self.cache.generation()?;
        let fetched = self.store.get(&key).await.map_err(|e| {
            warn!(key = %key, error = %e, "Backing store get failed");
            e
        })?;

        match fetched {
            Some(value) => {
                if self.config.enabled {
                    self.cache.populate(&key, value.clone(), since)?;
                }
                Ok(Some(CacheRead::from_store(value, key)))
            }
            None => Ok(None),
        }
    }

    /// Read `key` with every direct child of a container replaced by `true`.
    pub async fn read_shallow(&self, key: &str) -> FirelinkResult<Option<Value>> {
        Ok(self.read(key).await?.map(|value| value.shallow()))
    }

    /// Write `value` at `key`, replacing whatever subtree was there.
    ///
    /// Map keys inside `value` are validated before any store call. The
    /// cache is only updated once the store has accepted the write.
    pub async fn update(&self, key: &str, value: impl Into<Value>) -> FirelinkResult<()> {
        let key = self.resolve(key)?;
        let value = value.into();
        value.validate_keys()?;

        self.store.set(&key, &value).await.map_err(|e| {
            warn!(key = %key, error = %e, "Backing store set failed, cache untouched");
            e
        })?;

        if self.config.enabled {
            self.cache.write_through(&key, value)?;
        }
        debug!(key = %key, "Write-through complete");
        Ok(())
    }

    /// Remove whatever is stored at `key`.
    ///
    /// Deleting a key that does not exist is not an error.
    pub async fn delete(&self, key: &str) -> FirelinkResult<()> {
        let key = self.resolve(key)?;

        self.store.remove(&key).await.map_err(|e| {
            warn!(key = %key, error = %e, "Backing store remove failed, cache untouched");
            e
        })?;

        let was_cached = self.cache.remove(&key)?;
        debug!(key = %key, was_cached, "Delete complete");
        Ok(())
    }

    /// Fetch the whole root subtree once and cache it under the root.
    ///
    /// Returns true if anything was cached. A no-op when caching is off.
    /// Later updates and deletes are written into the preloaded subtree, so
    /// it stays warm.
    pub async fn preload(&self) -> FirelinkResult<bool> {
        if !self.config.enabled {
            return Ok(false);
        }

        let key = self.root.key().clone();
        let since = self.cache.generation()?;
        let fetched = self.store.get(&key).await.map_err(|e| {
            warn!(key = %key, error = %e, "Preload failed");
            e
        })?;

        match fetched {
            Some(value) => {
                let cached = self.cache.populate(&key, value, since)?;
                info!(root = %key, cached, "Preloaded root subtree");
                Ok(cached)
            }
            None => {
                info!(root = %key, "Nothing to preload");
                Ok(false)
            }
        }
    }

    /// Drop any cached data overlapping `key`. No store call is made.
    ///
    /// Returns the number of entries dropped.
    pub fn invalidate(&self, key: &str) -> FirelinkResult<usize> {
        let key = self.resolve(key)?;
        Ok(self.cache.invalidate(&key)?)
    }

    /// Drop every cached entry. Returns the number dropped.
    pub fn clear_cache(&self) -> FirelinkResult<usize> {
        Ok(self.cache.clear()?)
    }

    pub fn cache_stats(&self) -> FirelinkResult<CacheStats> {
        Ok(self.cache.stats()?)
    }

    /// The entry cached exactly at `key`, without counting a hit or miss.
    pub fn cached(&self, key: &str) -> FirelinkResult<Option<Value>> {
        let key = self.resolve(key)?;
        Ok(self.cache.entry(&key)?.map(|entry| entry.value))
    }
}

impl<B> CachedAccessor<B>
where
    B: ChangeFeed + ?Sized,
{
    /// Subscribe to changes at or below `key`.
    ///
    /// Events bypass the cache; they do not update or invalidate it.
    pub async fn listen(&self, key: &str) -> FirelinkResult<ChangeStream> {
        let key = self.resolve(key)?;
        let stream = self.store.listen(&key).await?;
        debug!(key = %key, "Listening for changes");
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryConnector, MemoryStore};
    use crate::ReadOrigin;
    use async_trait::async_trait;
    use firelink_core::{
        AuthError, BackingStoreError, CredentialsLocator, FirelinkError, PathError,
        StoreFailureKind, StoreOperation, ValidationError,
    };
    use serde_json::json;
    use tokio::sync::Notify;

    fn accessor(root: &str, config: CacheConfig) -> (CachedAccessor<MemoryStore>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let root = RootPath::parse(root).expect("valid root");
        (CachedAccessor::new(Arc::clone(&store), root, config), store)
    }

    fn key(s: &str) -> AbsoluteKey {
        AbsoluteKey::parse(s).expect("valid key")
    }

    #[tokio::test]
    async fn test_update_read_delete_scenario() {
        let (accessor, store) = accessor("users/u1", CacheConfig::default());

        accessor.update("name", "John Doe").await.expect("update");
        assert_eq!(store.calls().set, 1);
        assert_eq!(store.snapshot(&key("users/u1/name")), Some(Value::from("John Doe")));

        assert_eq!(
            accessor.read("name").await.expect("read"),
            Some(Value::from("John Doe"))
        );
        assert_eq!(store.calls().get, 0);

        accessor.delete("name").await.expect("delete");
        assert_eq!(store.calls().remove, 1);
        assert_eq!(store.snapshot(&key("users/u1/name")), None);

        assert_eq!(accessor.read("name").await.expect("read"), None);
        assert_eq!(store.calls().get, 1);
    }

    #[tokio::test]
    async fn test_read_through_caches_found_values_only() {
        let (accessor, store) = accessor("/", CacheConfig::default());
        store.seed(&key("a"), Value::from(1));

        let first = accessor.read_with_origin("a").await.expect("read").expect("found");
        assert_eq!(first.origin(), ReadOrigin::Store);
        let second = accessor.read_with_origin("a").await.expect("read").expect("found");
        assert_eq!(second.origin(), ReadOrigin::Cache);
        assert_eq!(store.calls().get, 1);

        assert_eq!(accessor.read("missing").await.expect("read"), None);
        assert_eq!(accessor.read("missing").await.expect("read"), None);
        assert_eq!(store.calls().get, 3);
    }

    #[tokio::test]
    async fn test_null_and_empty_are_not_not_found() {
        let (accessor, _store) = accessor("/", CacheConfig::default());
        accessor.update("n", Value::Null).await.expect("update");
        accessor.update("m", Value::empty_map()).await.expect("update");

        assert_eq!(accessor.read("n").await.expect("read"), Some(Value::Null));
        assert_eq!(accessor.read("m").await.expect("read"), Some(Value::empty_map()));
        assert_eq!(accessor.read("x").await.expect("read"), None);
    }

    #[tokio::test]
    async fn test_failed_set_leaves_cache_untouched() {
        let (accessor, store) = accessor("users/u1", CacheConfig::default());
        accessor.update("name", "old").await.expect("update");

        store.fail_next(StoreOperation::Set, StoreFailureKind::Unavailable);
        let err = accessor.update("name", "new").await.expect_err("set fails");
        let store_err = err.as_store_error().expect("store error");
        assert_eq!(store_err.operation, StoreOperation::Set);
        assert_eq!(store_err.key, "users/u1/name");

        assert_eq!(accessor.cached("name").expect("cached"), Some(Value::from("old")));
        assert_eq!(accessor.read("name").await.expect("read"), Some(Value::from("old")));
        assert_eq!(store.calls().get, 0);
    }

    #[tokio::test]
    async fn test_failed_remove_leaves_cache_untouched() {
        let (accessor, store) = accessor("/", CacheConfig::default());
        accessor.update("a", 1).await.expect("update");

        store.fail_next(StoreOperation::Remove, StoreFailureKind::PermissionDenied);
        assert!(matches!(
            accessor.delete("a").await,
            Err(FirelinkError::Store(_))
        ));
        assert_eq!(accessor.cached("a").expect("cached"), Some(Value::from(1)));
    }

    #[tokio::test]
    async fn test_failed_get_is_not_cached() {
        let (accessor, store) = accessor("/", CacheConfig::default());
        store.seed(&key("a"), Value::from(1));

        store.fail_next(StoreOperation::Get, StoreFailureKind::Unavailable);
        assert!(accessor.read("a").await.is_err());
        assert!(accessor.cache_stats().expect("stats").entry_count == 0);

        assert_eq!(accessor.read("a").await.expect("read"), Some(Value::from(1)));
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_ok() {
        let (accessor, store) = accessor("/", CacheConfig::default());
        accessor.delete("nothing/here").await.expect("delete");
        accessor.delete("nothing/here").await.expect("delete");
        assert_eq!(store.calls().remove, 2);
    }

    #[tokio::test]
    async fn test_caching_disabled_always_hits_store() {
        let (accessor, store) = accessor("/", CacheConfig::disabled());
        accessor.update("a", 1).await.expect("update");

        for _ in 0..3 {
            assert_eq!(accessor.read("a").await.expect("read"), Some(Value::from(1)));
        }
        assert_eq!(store.calls().get, 3);
        assert!(accessor.cache_stats().expect("stats").entry_count == 0);
        assert!(!accessor.preload().await.expect("preload"));
    }

    #[tokio::test]
    async fn test_child_read_served_from_cached_parent() {
        let (accessor, store) = accessor("users", CacheConfig::default());
        accessor
            .update("u1", json!({ "name": "John", "tags": ["a", "b"] }))
            .await
            .expect("update");

        assert_eq!(accessor.read("u1/name").await.expect("read"), Some(Value::from("John")));
        assert_eq!(accessor.read("u1/tags/1").await.expect("read"), Some(Value::from("b")));
        assert_eq!(accessor.read("u1/email").await.expect("read"), None);
        assert_eq!(store.calls().get, 0);
    }

    #[tokio::test]
    async fn test_ancestor_reads_can_be_disabled() {
        let config = CacheConfig::new().with_ancestor_reads(false);
        let (accessor, store) = accessor("users", config);
        accessor.update("u1", json!({ "name": "John" })).await.expect("update");

        assert_eq!(accessor.read("u1/name").await.expect("read"), Some(Value::from("John")));
        assert_eq!(store.calls().get, 1);
    }

    #[tokio::test]
    async fn test_child_write_patches_cached_parent() {
        let (accessor, store) = accessor("/", CacheConfig::default());
        accessor.update("a", json!({ "b": 1, "c": 2 })).await.expect("update");
        accessor.update("a/b", 10).await.expect("update");

        assert_eq!(
            accessor.cached("a").expect("cached"),
            Some(Value::from(json!({ "b": 10, "c": 2 })))
        );
        assert_eq!(
            accessor.read("a").await.expect("read"),
            store.snapshot(&key("a"))
        );
        assert_eq!(store.calls().get, 0);
    }

    #[tokio::test]
    async fn test_preload_stays_warm_across_writes() {
        let (accessor, store) = accessor("users/u1", CacheConfig::default());
        store.seed(&key("users/u1"), Value::from(json!({ "name": "John", "age": 30 })));
        assert!(accessor.preload().await.expect("preload"));

        accessor.update("age", 31).await.expect("update");
        assert_eq!(accessor.read("name").await.expect("read"), Some(Value::from("John")));
        assert_eq!(accessor.read("age").await.expect("read"), Some(Value::from(31)));
        assert_eq!(store.calls().get, 1);
        assert_eq!(accessor.cached("").expect("cached"), store.snapshot(&key("users/u1")));

        accessor.delete("name").await.expect("delete");
        assert_eq!(accessor.read("name").await.expect("read"), None);
        assert_eq!(accessor.read("age").await.expect("read"), Some(Value::from(31)));
        assert_eq!(store.calls().get, 1);
        assert_eq!(
            accessor.cached("").expect("cached"),
            Some(Value::from(json!({ "age": 31 })))
        );
    }

    #[tokio::test]
    async fn test_parent_write_and_delete_invalidate_cached_children() {
        let (accessor, _store) = accessor("/", CacheConfig::default());
        accessor.update("a/b", 1).await.expect("update");
        accessor.update("a", json!({ "c": 2 })).await.expect("update");
        assert_eq!(accessor.read("a/b").await.expect("read"), None);

        accessor.update("x/y", 1).await.expect("update");
        accessor.delete("x").await.expect("delete");
        assert_eq!(accessor.cached("x/y").expect("cached"), None);
        assert_eq!(accessor.read("x/y").await.expect("read"), None);
    }

    #[tokio::test]
    async fn test_update_rejects_forbidden_keys_before_set() {
        let (accessor, store) = accessor("/", CacheConfig::default());
        let err = accessor
            .update("a", json!({ "ok": { "bad.key": 1 } }))
            .await
            .expect_err("forbidden key");

        assert!(matches!(
            err,
            FirelinkError::Validation(ValidationError::ForbiddenKeyCharacter { .. })
        ));
        assert_eq!(store.calls().set, 0);
    }

    #[tokio::test]
    async fn test_escaping_key_is_rejected_without_store_calls() {
        let (accessor, store) = accessor("users/u1", CacheConfig::default());

        assert!(matches!(
            accessor.read("../u2/name").await,
            Err(FirelinkError::Path(PathError::EscapesRoot { .. }))
        ));
        assert!(accessor.update("../../x", 1).await.is_err());
        assert!(accessor.delete("a/../..").await.is_err());
        assert_eq!(store.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_read_shallow() {
        let (accessor, _store) = accessor("/", CacheConfig::default());
        accessor
            .update("u", json!({ "a": { "deep": 1 }, "b": 2 }))
            .await
            .expect("update");

        assert_eq!(
            accessor.read_shallow("u").await.expect("read"),
            Some(Value::from(json!({ "a": true, "b": true })))
        );
        assert_eq!(
            accessor.read_shallow("u/b").await.expect("read"),
            Some(Value::from(2))
        );
    }

    #[tokio::test]
    async fn test_preload_serves_root_subtree() {
        let (accessor, store) = accessor("users/u1", CacheConfig::default());
        store.seed(&key("users/u1"), Value::from(json!({ "name": "John", "age": 30 })));

        assert!(accessor.preload().await.expect("preload"));
        assert_eq!(accessor.read("name").await.expect("read"), Some(Value::from("John")));
        assert_eq!(accessor.read("age").await.expect("read"), Some(Value::from(30)));
        assert_eq!(accessor.read("email").await.expect("read"), None);
        assert_eq!(store.calls().get, 1);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear_cache() {
        let (accessor, store) = accessor("/", CacheConfig::default());
        accessor.update("a", 1).await.expect("update");
        accessor.update("b", 2).await.expect("update");

        assert_eq!(accessor.invalidate("a").expect("invalidate"), 1);
        assert_eq!(accessor.read("a").await.expect("read"), Some(Value::from(1)));
        assert_eq!(store.calls().get, 1);

        assert_eq!(accessor.clear_cache().expect("clear"), 2);
        assert_eq!(accessor.cache_stats().expect("stats").entry_count, 0);
    }

    #[tokio::test]
    async fn test_cache_stats_track_hits_and_misses() {
        let (accessor, _store) = accessor("/", CacheConfig::default());
        accessor.update("a", 1).await.expect("update");
        accessor.read("a").await.expect("read");
        accessor.read("b").await.expect("read");

        let stats = accessor.cache_stats().expect("stats");
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert!((stats.hit_rate() - 0.5).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_listen_reports_relative_changes() {
        let (accessor, _store) = accessor("users/u1", CacheConfig::default());
        accessor.update("name", "John").await.expect("update");

        let mut stream = accessor.listen("").await.expect("listen");
        let snapshot = stream.recv().await.expect("snapshot");
        assert!(snapshot.is_root());
        assert_eq!(snapshot.data, Some(Value::from(json!({ "name": "John" }))));

        accessor.update("age", 30).await.expect("update");
        let change = stream.recv().await.expect("change");
        assert_eq!(change.path, "/age");
        assert_eq!(change.data, Some(Value::from(30)));
    }

    #[tokio::test]
    async fn test_connect_uses_config() {
        let store = Arc::new(MemoryStore::new());
        let connector = MemoryConnector::new(Arc::clone(&store))
            .accept(CredentialsLocator::new("service-account.json"));
        let config = AccessorConfig::new(
            "https://demo.firebaseio.com",
            CredentialsLocator::new("service-account.json"),
        )
        .with_root_path("users/{uid}")
        .with_binding("uid", "u1")
        .with_caching(false);

        let accessor = CachedAccessor::connect(&connector, &config).await.expect("connect");
        assert_eq!(accessor.root().key().as_str(), "users/u1");
        assert!(!accessor.caching_enabled());

        accessor.update("name", "x").await.expect("update");
        assert_eq!(store.snapshot(&key("users/u1/name")), Some(Value::from("x")));
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_credentials() {
        let connector = MemoryConnector::new(Arc::new(MemoryStore::new()))
            .accept(CredentialsLocator::new("good.json"));
        let config = AccessorConfig::new(
            "https://demo.firebaseio.com",
            CredentialsLocator::new("bad.json"),
        );

        let result = CachedAccessor::connect(&connector, &config).await;
        assert!(matches!(
            result,
            Err(FirelinkError::Auth(AuthError::Rejected { .. }))
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_root_before_connecting() {
        let connector = MemoryConnector::new(Arc::new(MemoryStore::new()))
            .accept(CredentialsLocator::new("good.json"));
        let config = AccessorConfig::new(
            "https://demo.firebaseio.com",
            CredentialsLocator::new("good.json"),
        )
        .with_root_path("");

        assert!(matches!(
            CachedAccessor::connect(&connector, &config).await,
            Err(FirelinkError::Path(PathError::EmptyRoot))
        ));
    }

    /// Wraps a [`MemoryStore`] and parks every get after it has read its
    /// value, until released.
    struct GatedStore {
        inner: MemoryStore,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl BackingStore for GatedStore {
        async fn get(&self, key: &AbsoluteKey) -> Result<Option<Value>, BackingStoreError> {
            let value = self.inner.get(key).await?;
            self.entered.notify_one();
            self.release.notified().await;
            Ok(value)
        }

        async fn set(&self, key: &AbsoluteKey, value: &Value) -> Result<(), BackingStoreError> {
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &AbsoluteKey) -> Result<(), BackingStoreError> {
            self.inner.remove(key).await
        }
    }

    #[tokio::test]
    async fn test_read_racing_update_does_not_cache_stale_value() {
        let store = Arc::new(GatedStore {
            inner: MemoryStore::new(),
            entered: Notify::new(),
            release: Notify::new(),
        });
        store.inner.seed(&key("k"), Value::from("old"));
        let accessor = CachedAccessor::new(
            Arc::clone(&store),
            RootPath::database_root(),
            CacheConfig::default(),
        );

        let (read, written) = tokio::join!(accessor.read("k"), async {
            store.entered.notified().await;
            let written = accessor.update("k", "new").await;
            store.release.notify_one();
            written
        });
        written.expect("update");
        assert_eq!(read.expect("read"), Some(Value::from("old")));

        assert_eq!(accessor.cached("k").expect("cached"), Some(Value::from("new")));
        assert_eq!(accessor.read("k").await.expect("read"), Some(Value::from("new")));
        assert_eq!(store.inner.calls().get, 1);
    }
}
