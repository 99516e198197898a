#![no_main]

use libfuzzer_sys::fuzz_target;
use pushkeep_core::delivery::{NotificationDefaults, PushContent};
use pushkeep_core::subscription::{normalize, normalize_str};

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Some(sub) = normalize_str(text) {
            assert!(!sub.endpoint().is_empty());
            assert!(!sub.keys().auth.is_empty());
            assert!(!sub.keys().p256dh.is_empty());
            // Normalizing the canonical form is a fixed point.
            assert_eq!(normalize(&sub.to_json()).as_ref(), Some(&sub));
        }
    }

    let defaults = NotificationDefaults::default();
    let content = PushContent::parse(Some(data), &defaults);
    assert!(!content.title.trim().is_empty());
    assert!(!content.body.trim().is_empty());
});
