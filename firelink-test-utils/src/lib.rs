//! Firelink Test Utilities
//!
//! Shared test infrastructure for the firelink workspace:
//! - Proptest generators for keys, paths and values
//! - Fixtures wiring an accessor to the in-memory store
//! - Assertions for firelink error variants

pub use firelink_core::{
    AbsoluteKey, AccessorConfig, CredentialsLocator, FirelinkError, FirelinkResult, PathError,
    RootPath, StoreFailureKind, StoreOperation, Value,
};
pub use firelink_storage::{
    CacheConfig, CachedAccessor, MemoryConnector, MemoryStore, StoreCallCounts,
};

use std::sync::Arc;

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for firelink types.

    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    /// Generate a single valid key segment.
    pub fn arb_segment() -> impl Strategy<Value = String> {
        "[a-z0-9_-]{1,8}"
    }

    /// Generate a relative path of 1-4 segments with occasional duplicate,
    /// leading or trailing separators.
    pub fn arb_relative_path() -> impl Strategy<Value = String> {
        (
            prop::collection::vec(arb_segment(), 1..5),
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(segments, leading, trailing, doubled)| {
                let sep = if doubled { "//" } else { "/" };
                let mut path = segments.join(sep);
                if leading {
                    path.insert(0, '/');
                }
                if trailing {
                    path.push('/');
                }
                path
            })
    }

    /// Generate a relative path whose `..` segments climb above its start.
    pub fn arb_escaping_path() -> impl Strategy<Value = String> {
        (prop::collection::vec(arb_segment(), 0..3), 1usize..3, arb_segment()).prop_map(
            |(segments, extra, tail)| {
                let ups = vec![".."; segments.len() + extra];
                let mut parts = segments;
                parts.extend(ups.into_iter().map(String::from));
                parts.push(tail);
                parts.join("/")
            },
        )
    }

    /// Generate a root template without placeholders, `/` included.
    pub fn arb_root() -> impl Strategy<Value = RootPath> {
        prop_oneof![
            1 => Just(RootPath::database_root()),
            4 => prop::collection::vec(arb_segment(), 1..4).prop_filter_map(
                "root must parse",
                |segments| RootPath::parse(&segments.join("/")).ok()
            ),
        ]
    }

    /// Generate a scalar value. Floats stay finite so values compare equal.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            (-1.0e9f64..1.0e9f64).prop_map(Value::Float),
            "[ -~]{0,16}".prop_map(Value::String),
        ]
    }

    /// Generate a value up to three levels deep with valid map keys.
    pub fn arb_value() -> impl Strategy<Value = Value> {
        arb_scalar().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
                prop::collection::btree_map(arb_segment(), inner, 0..4)
                    .prop_map(|m: BTreeMap<String, Value>| Value::Map(m)),
            ]
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    /// Credentials accepted by [`memory_connector`].
    pub const TEST_CREDENTIALS: &str = "test-service-account.json";

    /// Database URL used by [`test_config`].
    pub const TEST_DATABASE_URL: &str = "https://firelink-test.firebaseio.com";

    /// A valid config rooted at `root_path`.
    pub fn test_config(root_path: &str) -> AccessorConfig {
        AccessorConfig::new(TEST_DATABASE_URL, CredentialsLocator::new(TEST_CREDENTIALS))
            .with_root_path(root_path)
    }

    /// A connector over `store` that accepts [`TEST_CREDENTIALS`].
    pub fn memory_connector(store: Arc<MemoryStore>) -> MemoryConnector {
        MemoryConnector::new(store).accept(CredentialsLocator::new(TEST_CREDENTIALS))
    }

    /// An accessor over a fresh in-memory store, plus the store for
    /// inspecting calls.
    pub fn memory_accessor(
        root: RootPath,
        config: CacheConfig,
    ) -> (CachedAccessor<MemoryStore>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (CachedAccessor::new(Arc::clone(&store), root, config), store)
    }

    /// The `users/u1` accessor used in the worked example.
    pub fn user_accessor(caching: bool) -> (CachedAccessor<MemoryStore>, Arc<MemoryStore>) {
        match RootPath::parse("users/u1") {
            Ok(root) => memory_accessor(root, CacheConfig::new().with_caching(caching)),
            Err(e) => panic!("fixture root must parse: {}", e),
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for firelink error variants.

    use super::*;

    /// Assert that a FirelinkResult is a Path error.
    #[track_caller]
    pub fn assert_path_error<T: std::fmt::Debug>(result: &FirelinkResult<T>) {
        match result {
            Err(FirelinkError::Path(_)) => {}
            other => panic!("Expected Path error, got: {:?}", other),
        }
    }

    /// Assert that a FirelinkResult is a backing-store error for `operation`.
    #[track_caller]
    pub fn assert_store_error<T: std::fmt::Debug>(
        result: &FirelinkResult<T>,
        operation: StoreOperation,
    ) {
        match result {
            Err(FirelinkError::Store(e)) => {
                assert_eq!(e.operation, operation, "Wrong operation in store error");
            }
            other => panic!("Expected Store error for {}, got: {:?}", operation, other),
        }
    }

    /// Assert the exact number of get/set/remove calls a store has seen.
    #[track_caller]
    pub fn assert_calls(store: &MemoryStore, get: u64, set: u64, remove: u64) {
        let calls = store.calls();
        assert_eq!(
            (calls.get, calls.set, calls.remove),
            (get, set, remove),
            "Unexpected (get, set, remove) call counts"
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================
