//! Fuzz test for root template parsing and binding
//!
//! Parses arbitrary templates and binds every placeholder, checking that a
//! fully bound root never panics when resolving and never keeps a
//! placeholder in its key.
//!
//! Run with: cargo +nightly fuzz run root_template_fuzz -- -max_total_time=60

#![no_main]

use std::collections::BTreeMap;

use firelink_core::RootPath;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(template) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(root) = RootPath::parse(template) else {
        return;
    };

    let bindings: BTreeMap<String, String> = root
        .placeholders()
        .map(|name| (name.to_string(), "x".to_string()))
        .collect();
    if bindings.is_empty() {
        return;
    }

    let bound = root.bind(&bindings);
    assert!(bound.is_ok(), "binding every placeholder failed: {:?}", bound);
    if let Ok(bound) = bound {
        for name in root.placeholders() {
            let marker = format!("{{{}}}", name);
            assert!(bound.key().segments().all(|s| s != marker));
        }
        let _ = bound.resolve("a/../b");
    }
});
