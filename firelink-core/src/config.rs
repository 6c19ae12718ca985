//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, FirelinkResult};
use crate::path::RootPath;

/// Where the credentials for the database live.
///
/// Opaque to this crate: only the connector reads it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialsLocator(PathBuf);

impl CredentialsLocator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.as_os_str().is_empty()
    }
}

impl fmt::Display for CredentialsLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

fn default_root_path() -> String {
    "/".to_string()
}

fn default_caching() -> bool {
    true
}

/// Construction parameters for an accessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessorConfig {
    /// URL of the database instance.
    pub database_url: String,
    /// Credentials handed to the connector.
    pub credentials: CredentialsLocator,
    /// Root template scoping every key, `/` for the whole database.
    #[serde(default = "default_root_path")]
    pub root_path: String,
    /// Placeholder substitutions for `root_path`.
    #[serde(default)]
    pub bindings: BTreeMap<String, String>,
    /// true: reads may be served from the local mirror; false: every read
    /// hits the backing store.
    #[serde(default = "default_caching")]
    pub caching_enabled: bool,
}

impl AccessorConfig {
    pub fn new(database_url: impl Into<String>, credentials: CredentialsLocator) -> Self {
        Self {
            database_url: database_url.into(),
            credentials,
            root_path: default_root_path(),
            bindings: BTreeMap::new(),
            caching_enabled: default_caching(),
        }
    }

    pub fn with_root_path(mut self, root_path: impl Into<String>) -> Self {
        self.root_path = root_path.into();
        self
    }

    pub fn with_binding(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.bindings.insert(name.into(), value.into());
        self
    }

    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.caching_enabled = enabled;
        self
    }

    /// Create from environment variables.
    ///
    /// Environment variables:
    /// - `FIRELINK_DATABASE_URL`: database URL (required)
    /// - `FIRELINK_CREDENTIALS`: credentials locator (required)
    /// - `FIRELINK_ROOT_PATH`: root template (default: `/`)
    /// - `FIRELINK_BINDINGS`: comma-separated `name=value` pairs (default: none)
    /// - `FIRELINK_CACHE`: "true" or "false" (default: true)
    pub fn from_env() -> FirelinkResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> FirelinkResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingRequired {
                    field: name.to_string(),
                })
        };

        let database_url = required("FIRELINK_DATABASE_URL")?;
        let credentials = CredentialsLocator::new(required("FIRELINK_CREDENTIALS")?);
        let root_path = lookup("FIRELINK_ROOT_PATH").unwrap_or_else(default_root_path);
        let bindings = match lookup("FIRELINK_BINDINGS") {
            Some(raw) => parse_bindings(&raw)?,
            None => BTreeMap::new(),
        };
        let caching_enabled = match lookup("FIRELINK_CACHE") {
            Some(raw) => parse_flag("FIRELINK_CACHE", &raw)?,
            None => default_caching(),
        };

        let config = Self {
            database_url,
            credentials,
            root_path,
            bindings,
            caching_enabled,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - database_url is an http(s) URL
    /// - credentials is not empty
    /// - root_path parses and every placeholder is bound (when bindings are given),
    ///   failing with a path error otherwise
    pub fn validate(&self) -> FirelinkResult<()> {
        let url = self.database_url.trim();
        if url.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "database_url".to_string(),
            }
            .into());
        }
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ConfigError::InvalidValue {
                field: "database_url".to_string(),
                value: self.database_url.clone(),
                reason: "must be an http(s) URL".to_string(),
            }
            .into());
        }

        if self.credentials.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "credentials".to_string(),
            }
            .into());
        }

        self.root().map(|_| ())
    }

    /// Parse and bind the configured root.
    ///
    /// A malformed template or a missing binding comes back as
    /// [`FirelinkError::Path`](crate::FirelinkError::Path).
    pub fn root(&self) -> FirelinkResult<RootPath> {
        Ok(RootPath::parse(&self.root_path)?.bind(&self.bindings)?)
    }
}

fn parse_flag(field: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: raw.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

fn parse_bindings(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: "FIRELINK_BINDINGS".to_string(),
                    value: pair.to_string(),
                    reason: "expected name=value".to_string(),
                })
        })
        .collect()
}
