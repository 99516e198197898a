#![no_main]

use libfuzzer_sys::fuzz_target;
use pushkeep_core::identity::{endpoint_from_key, sanitize_endpoint};

fuzz_target!(|data: &[u8]| {
    let Ok(endpoint) = std::str::from_utf8(data) else {
        return;
    };
    let key = sanitize_endpoint(endpoint);
    assert!(!key.contains('/'));
    assert!(key.is_ascii());
    assert_eq!(endpoint_from_key(&key).as_deref(), Some(endpoint));
});
