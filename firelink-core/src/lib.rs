//! Firelink Core - Values, Paths, Errors and Configuration
//!
//! Pure data types shared by every firelink crate. No I/O happens here:
//! the backing-store capability and the cache live in `firelink-storage`.

pub mod config;
pub mod error;
pub mod path;
pub mod value;

pub use config::{AccessorConfig, CredentialsLocator};
pub use error::{
    AuthError, BackingStoreError, CacheError, ConfigError, FirelinkError, FirelinkResult,
    PathError, StoreFailureKind, StoreOperation, ValidationError,
};
pub use path::{resolve, AbsoluteKey, RootPath, SEPARATOR};
pub use value::{validate_key, Value, FORBIDDEN_KEY_CHARS};
