//! Fuzz test for relative key resolution
//!
//! Feeds arbitrary relative keys to `resolve` under a fixed root and checks:
//! - No panics on any UTF-8 input
//! - Resolved keys always stay under the root
//! - Resolution is idempotent on its own output
//!
//! Run with: cargo +nightly fuzz run resolve_fuzz -- -max_total_time=60

#![no_main]

use firelink_core::{AbsoluteKey, RootPath};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(relative) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(root) = RootPath::parse("users/u1") else {
        return;
    };

    if let Ok(key) = root.resolve(relative) {
        assert!(
            key == *root.key() || root.key().is_ancestor_of(&key),
            "{} escaped root {}",
            key,
            root.key()
        );

        // The stored form re-parses to the same key.
        let reparsed = AbsoluteKey::parse(key.as_str());
        assert_eq!(reparsed.as_ref(), Ok(&key));

        // Re-resolving the suffix below the root lands on the same key.
        let suffix = key.strip_prefix(root.key()).map(|s| s.join("/"));
        if let Some(suffix) = suffix {
            assert_eq!(root.resolve(&suffix).as_ref(), Ok(&key));
        }
    }
});
