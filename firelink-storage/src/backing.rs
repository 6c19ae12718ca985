//! Backing-store capability interface.
//!
//! The database client is an external collaborator. The accessor reaches it
//! only through these traits, so anything from a real network client to the
//! in-process [`MemoryStore`](crate::MemoryStore) can sit behind it.

use async_trait::async_trait;
use firelink_core::{
    AbsoluteKey, AccessorConfig, AuthError, BackingStoreError, CredentialsLocator, Value,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Everything a connector needs to open a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub database_url: String,
    pub credentials: CredentialsLocator,
}

impl ConnectTarget {
    pub fn new(database_url: impl Into<String>, credentials: CredentialsLocator) -> Self {
        Self {
            database_url: database_url.into(),
            credentials,
        }
    }
}

impl From<&AccessorConfig> for ConnectTarget {
    fn from(config: &AccessorConfig) -> Self {
        Self::new(config.database_url.clone(), config.credentials.clone())
    }
}

/// Opens connections to a backing store.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The connection handle produced on success.
    type Store: BackingStore;

    /// Authenticate and connect.
    ///
    /// Fails with [`AuthError`] when the credentials are invalid or
    /// unreadable.
    async fn connect(&self, target: &ConnectTarget) -> Result<Self::Store, AuthError>;
}

/// Get/set/remove on a hierarchical database.
///
/// The value at a key is the whole subtree below it: `get("a")` includes
/// whatever was set at `"a/b"`, and `set`/`remove` at a key replace or drop
/// that entire subtree. `get` returns `None` when nothing is stored.
#[async_trait]
pub trait BackingStore: Send + Sync {
    async fn get(&self, key: &AbsoluteKey) -> Result<Option<Value>, BackingStoreError>;

    async fn set(&self, key: &AbsoluteKey, value: &Value) -> Result<(), BackingStoreError>;

    async fn remove(&self, key: &AbsoluteKey) -> Result<(), BackingStoreError>;
}

#[async_trait]
impl<B: BackingStore + ?Sized> BackingStore for Arc<B> {
    async fn get(&self, key: &AbsoluteKey) -> Result<Option<Value>, BackingStoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &AbsoluteKey, value: &Value) -> Result<(), BackingStoreError> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &AbsoluteKey) -> Result<(), BackingStoreError> {
        (**self).remove(key).await
    }
}

// ============================================================================
// CHANGE FEED
// ============================================================================

/// A change observed under a listened key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Location of the change relative to the listened key, `/` for the key
    /// itself.
    pub path: String,
    /// The new data at `path`, `None` when it was removed.
    pub data: Option<Value>,
}

impl ChangeEvent {
    pub fn new(path: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            path: path.into(),
            data,
        }
    }

    /// Build an event for `changed` as seen from `listened`.
    ///
    /// `data` is the new value at `changed` when it lies at or below
    /// `listened`, or at `listened` when the change happened above it.
    /// Returns `None` when the two keys are unrelated.
    pub fn relative_to(
        listened: &AbsoluteKey,
        changed: &AbsoluteKey,
        data: Option<Value>,
    ) -> Option<Self> {
        if let Some(segments) = changed.strip_prefix(listened) {
            return Some(Self::new(format!("/{}", segments.join("/")), data));
        }
        if changed.is_ancestor_of(listened) {
            return Some(Self::new("/", data));
        }
        None
    }

    /// True if the event describes the listened key itself.
    pub fn is_root(&self) -> bool {
        self.path == "/"
    }
}

/// Receiving half of a subscription.
///
/// Dropping the stream ends the subscription.
#[derive(Debug)]
pub struct ChangeStream {
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl ChangeStream {
    pub fn new(receiver: mpsc::UnboundedReceiver<ChangeEvent>) -> Self {
        Self { receiver }
    }

    /// A connected sender/stream pair.
    pub fn channel() -> (mpsc::UnboundedSender<ChangeEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx))
    }

    /// Wait for the next event. `None` once the store side has gone away.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    /// Take an already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Stores that can push change notifications.
#[async_trait]
pub trait ChangeFeed: BackingStore {
    /// Subscribe to changes at or below `key`.
    ///
    /// The first event is a snapshot of the current data at `/`.
    async fn listen(&self, key: &AbsoluteKey) -> Result<ChangeStream, BackingStoreError>;
}

#[async_trait]
impl<B: ChangeFeed + ?Sized> ChangeFeed for Arc<B> {
    async fn listen(&self, key: &AbsoluteKey) -> Result<ChangeStream, BackingStoreError> {
        (**self).listen(key).await
    }
}
