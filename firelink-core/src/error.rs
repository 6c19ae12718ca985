//! Error types for firelink operations

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Path resolution errors.
///
/// Raised locally, before any backing-store call is attempted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("Root path must not be empty (use \"/\" to address the database root)")]
    EmptyRoot,

    #[error("Relative path '{path}' escapes the root")]
    EscapesRoot { path: String },

    #[error("Invalid path segment '{segment}': {reason}")]
    InvalidSegment { segment: String, reason: String },

    #[error("Root placeholder '{{{name}}}' has no binding")]
    UnboundPlaceholder { name: String },

    #[error("Invalid binding for placeholder '{name}': {reason}")]
    InvalidBinding { name: String, reason: String },
}

/// Authentication errors, surfaced when connecting.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Credentials at '{locator}' are unreadable: {reason}")]
    Unreadable { locator: String, reason: String },

    #[error("Credentials at '{locator}' were rejected: {reason}")]
    Rejected { locator: String, reason: String },

    #[error("Invalid database URL '{url}': {reason}")]
    InvalidDatabaseUrl { url: String, reason: String },
}

/// The backing-store capability that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Get,
    Set,
    Remove,
    Listen,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreOperation::Get => "get",
            StoreOperation::Set => "set",
            StoreOperation::Remove => "remove",
            StoreOperation::Listen => "listen",
        };
        f.write_str(name)
    }
}

/// Coarse classification of a backing-store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreFailureKind {
    /// The store could not be reached.
    Unavailable,
    /// The store refused the operation for the current credentials.
    PermissionDenied,
    /// The store rejected the request payload.
    Rejected,
    /// Anything else reported by the client library.
    Other,
}

impl fmt::Display for StoreFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreFailureKind::Unavailable => "unavailable",
            StoreFailureKind::PermissionDenied => "permission denied",
            StoreFailureKind::Rejected => "rejected",
            StoreFailureKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// A failure reported by the backing store's get/set/remove capability.
///
/// The originating error is kept as the `source()` of this error so callers
/// can walk the full chain.
#[derive(Debug, Clone, Error)]
#[error("Backing store {operation} failed for '{key}' ({kind}): {cause}")]
pub struct BackingStoreError {
    pub operation: StoreOperation,
    pub key: String,
    pub kind: StoreFailureKind,
    #[source]
    pub cause: Arc<dyn StdError + Send + Sync>,
}

impl BackingStoreError {
    /// Wrap a client-library failure.
    pub fn new(
        operation: StoreOperation,
        key: impl Into<String>,
        kind: StoreFailureKind,
        cause: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            operation,
            key: key.into(),
            kind,
            cause: Arc::from(cause.into()),
        }
    }

    /// Shorthand for a connectivity failure.
    pub fn unavailable(
        operation: StoreOperation,
        key: impl Into<String>,
        cause: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::new(operation, key, StoreFailureKind::Unavailable, cause)
    }

    /// Shorthand for a permission failure.
    pub fn permission_denied(
        operation: StoreOperation,
        key: impl Into<String>,
        cause: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::new(operation, key, StoreFailureKind::PermissionDenied, cause)
    }
}

/// Value validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Key must not be empty")]
    EmptyKey,

    #[error("Key '{key}' contains forbidden character {character:?}")]
    ForbiddenKeyCharacter { key: String, character: char },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Local cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Master error type for all firelink errors.
#[derive(Debug, Clone, Error)]
pub enum FirelinkError {
    #[error("Path error: {0}")]
    Path(#[from] PathError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("{0}")]
    Store(#[from] BackingStoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl FirelinkError {
    /// The backing-store failure, if this error wraps one.
    pub fn as_store_error(&self) -> Option<&BackingStoreError> {
        match self {
            FirelinkError::Store(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias for firelink operations.
pub type FirelinkResult<T> = Result<T, FirelinkError>;

// =============================================================================
// TESTS
// =============================================================================
