//! In-process backing store.
//!
//! `MemoryStore` keeps the database tree in memory and implements every
//! capability the accessor consumes. It counts calls per operation and can
//! be told to fail, which makes it the reference collaborator for tests and
//! local development.

use async_trait::async_trait;
use firelink_core::{
    AbsoluteKey, AuthError, BackingStoreError, CredentialsLocator, StoreFailureKind,
    StoreOperation, Value,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;

use crate::backing::{BackingStore, ChangeEvent, ChangeFeed, ChangeStream, ConnectTarget, Connector};

// ============================================================================
// TREE OPERATIONS
// ============================================================================

fn tree_get(tree: &Option<Value>, key: &AbsoluteKey) -> Option<Value> {
    tree.as_ref()?.descend(key.segments()).cloned()
}

fn tree_set(tree: &mut Option<Value>, key: &AbsoluteKey, value: Value) {
    tree.get_or_insert_with(Value::empty_map)
        .set_at(key.segments(), value);
}

fn tree_remove(tree: &mut Option<Value>, key: &AbsoluteKey) {
    if key.is_root() {
        *tree = None;
        return;
    }
    if let Some(root) = tree.as_mut() {
        let segments: Vec<&str> = key.segments().collect();
        root.remove_at(&segments);
    }
}

// ============================================================================
// CALL ACCOUNTING AND FAILURE INJECTION
// ============================================================================

/// Number of capability calls a [`MemoryStore`] has received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCallCounts {
    pub get: u64,
    pub set: u64,
    pub remove: u64,
    pub listen: u64,
}

impl StoreCallCounts {
    pub fn total(&self) -> u64 {
        self.get + self.set + self.remove + self.listen
    }
}

#[derive(Debug, Default)]
struct CallCounters {
    get: AtomicU64,
    set: AtomicU64,
    remove: AtomicU64,
    listen: AtomicU64,
}

impl CallCounters {
    fn record(&self, operation: StoreOperation) {
        let counter = match operation {
            StoreOperation::Get => &self.get,
            StoreOperation::Set => &self.set,
            StoreOperation::Remove => &self.remove,
            StoreOperation::Listen => &self.listen,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> StoreCallCounts {
        StoreCallCounts {
            get: self.get.load(Ordering::SeqCst),
            set: self.set.load(Ordering::SeqCst),
            remove: self.remove.load(Ordering::SeqCst),
            listen: self.listen.load(Ordering::SeqCst),
        }
    }

    fn reset(&self) {
        for counter in [&self.get, &self.set, &self.remove, &self.listen] {
            counter.store(0, Ordering::SeqCst);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FailurePlan {
    Once(StoreFailureKind),
    Always(StoreFailureKind),
}

struct Subscriber {
    key: AbsoluteKey,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

// ============================================================================
// MEMORY STORE
// ============================================================================

/// In-memory hierarchical database.
#[derive(Default)]
pub struct MemoryStore {
    tree: RwLock<Option<Value>>,
    calls: CallCounters,
    failures: Mutex<HashMap<StoreOperation, FailurePlan>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose root holds `data`.
    pub fn with_data(data: Value) -> Self {
        Self {
            tree: RwLock::new(Some(data)),
            ..Self::default()
        }
    }

    /// Write directly, bypassing call accounting, failure injection and
    /// change notification.
    pub fn seed(&self, key: &AbsoluteKey, value: Value) {
        let mut tree = self.tree.write().unwrap_or_else(|e| e.into_inner());
        tree_set(&mut tree, key, value);
    }

    /// Read directly, bypassing call accounting and failure injection.
    pub fn snapshot(&self, key: &AbsoluteKey) -> Option<Value> {
        let tree = self.tree.read().unwrap_or_else(|e| e.into_inner());
        tree_get(&tree, key)
    }

    /// Calls received so far.
    pub fn calls(&self) -> StoreCallCounts {
        self.calls.snapshot()
    }

    pub fn reset_calls(&self) {
        self.calls.reset();
    }

    /// Fail the next call to `operation`, then behave normally.
    pub fn fail_next(&self, operation: StoreOperation, kind: StoreFailureKind) {
        self.plan_failure(operation, FailurePlan::Once(kind));
    }

    /// Fail every call to `operation` until [`clear_failures`](Self::clear_failures).
    pub fn fail_always(&self, operation: StoreOperation, kind: StoreFailureKind) {
        self.plan_failure(operation, FailurePlan::Always(kind));
    }

    pub fn clear_failures(&self) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|s| !s.sender.is_closed());
        subscribers.len()
    }

    fn plan_failure(&self, operation: StoreOperation, plan: FailurePlan) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(operation, plan);
    }

    /// Record the call and apply any planned failure.
    fn enter(&self, operation: StoreOperation, key: &AbsoluteKey) -> Result<(), BackingStoreError> {
        self.calls.record(operation);

        let mut failures = self.failures.lock().map_err(|_| poisoned(operation, key))?;
        let kind = match failures.get(&operation).copied() {
            Some(FailurePlan::Once(kind)) => {
                failures.remove(&operation);
                kind
            }
            Some(FailurePlan::Always(kind)) => kind,
            None => return Ok(()),
        };
        Err(BackingStoreError::new(
            operation,
            key.to_string(),
            kind,
            format!("injected {} failure", kind),
        ))
    }

    fn notify(&self, tree: &Option<Value>, changed: &AbsoluteKey) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|subscriber| {
            let data = if subscriber.key.is_ancestor_of(changed) || subscriber.key == *changed {
                tree_get(tree, changed)
            } else {
                tree_get(tree, &subscriber.key)
            };
            match ChangeEvent::relative_to(&subscriber.key, changed, data) {
                Some(event) => subscriber.sender.send(event).is_ok(),
                None => !subscriber.sender.is_closed(),
            }
        });
    }
}

fn poisoned(operation: StoreOperation, key: &AbsoluteKey) -> BackingStoreError {
    BackingStoreError::new(
        operation,
        key.to_string(),
        StoreFailureKind::Other,
        "memory store lock poisoned",
    )
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn get(&self, key: &AbsoluteKey) -> Result<Option<Value>, BackingStoreError> {
        self.enter(StoreOperation::Get, key)?;
        let tree = self
            .tree
            .read()
            .map_err(|_| poisoned(StoreOperation::Get, key))?;
        Ok(tree_get(&tree, key))
    }

    async fn set(&self, key: &AbsoluteKey, value: &Value) -> Result<(), BackingStoreError> {
        self.enter(StoreOperation::Set, key)?;
        let mut tree = self
            .tree
            .write()
            .map_err(|_| poisoned(StoreOperation::Set, key))?;
        tree_set(&mut tree, key, value.clone());
        self.notify(&tree, key);
        Ok(())
    }

    async fn remove(&self, key: &AbsoluteKey) -> Result<(), BackingStoreError> {
        self.enter(StoreOperation::Remove, key)?;
        let mut tree = self
            .tree
            .write()
            .map_err(|_| poisoned(StoreOperation::Remove, key))?;
        tree_remove(&mut tree, key);
        self.notify(&tree, key);
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for MemoryStore {
    async fn listen(&self, key: &AbsoluteKey) -> Result<ChangeStream, BackingStoreError> {
        self.enter(StoreOperation::Listen, key)?;
        let tree = self
            .tree
            .read()
            .map_err(|_| poisoned(StoreOperation::Listen, key))?;

        let (sender, stream) = ChangeStream::channel();
        // The receiver is alive, so the initial snapshot cannot fail to send.
        let _ = sender.send(ChangeEvent::new("/", tree_get(&tree, key)));
        self.subscribers
            .lock()
            .map_err(|_| poisoned(StoreOperation::Listen, key))?
            .push(Subscriber {
                key: key.clone(),
                sender,
            });
        Ok(stream)
    }
}

// ============================================================================
// MEMORY CONNECTOR
// ============================================================================

/// Connector handing out a shared [`MemoryStore`].
///
/// Only credential locators registered with [`accept`](Self::accept) are let
/// through.
#[derive(Clone)]
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
    accepted: HashSet<CredentialsLocator>,
}

impl MemoryConnector {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            accepted: HashSet::new(),
        }
    }

    /// Allow `credentials` to connect.
    pub fn accept(mut self, credentials: CredentialsLocator) -> Self {
        self.accepted.insert(credentials);
        self
    }

    /// The store every connection shares.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Store = Arc<MemoryStore>;

    async fn connect(&self, target: &ConnectTarget) -> Result<Self::Store, AuthError> {
        let url = target.database_url.as_str();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(AuthError::InvalidDatabaseUrl {
                url: target.database_url.clone(),
                reason: "expected an http(s) URL".to_string(),
            });
        }
        if target.credentials.is_empty() {
            return Err(AuthError::Unreadable {
                locator: target.credentials.to_string(),
                reason: "no credentials given".to_string(),
            });
        }
        if !self.accepted.contains(&target.credentials) {
            return Err(AuthError::Rejected {
                locator: target.credentials.to_string(),
                reason: "unknown credentials".to_string(),
            });
        }
        Ok(Arc::clone(&self.store))
    }
}
