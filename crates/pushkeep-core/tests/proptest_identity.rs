//! Property-based tests for endpoint key escaping.
//!
//! Covers determinism, injectivity, reversibility and the absence of path
//! separators in generated document keys.

use proptest::prelude::*;

use pushkeep_core::gateway::PersistenceGateway;
use pushkeep_core::identity::{endpoint_from_key, sanitize_endpoint};

// =============================================================================
// Strategies
// =============================================================================

/// Endpoint-shaped URLs from the push services seen in practice.
fn arb_endpoint() -> impl Strategy<Value = String> {
    let host = prop_oneof![
        Just("https://fcm.googleapis.com/fcm/send/"),
        Just("https://web.push.apple.com/"),
        Just("https://updates.push.services.mozilla.com/wpush/v2/"),
        Just("https://wns2-par02p.notify.windows.com/w/?token="),
    ];
    (host, "[A-Za-z0-9_:%./?#=+-]{1,120}").prop_map(|(h, tail)| format!("{h}{tail}"))
}

/// Arbitrary text, including separators and non-ASCII.
fn arb_any_text() -> impl Strategy<Value = String> {
    any::<String>()
}

// =============================================================================
// Determinism and injectivity
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn same_endpoint_same_key(endpoint in arb_endpoint()) {
        prop_assert_eq!(sanitize_endpoint(&endpoint), sanitize_endpoint(&endpoint));
    }

    #[test]
    fn distinct_endpoints_never_collide(a in arb_endpoint(), b in arb_endpoint()) {
        prop_assume!(a != b);
        prop_assert_ne!(sanitize_endpoint(&a), sanitize_endpoint(&b));
    }

    #[test]
    fn key_decodes_back_to_endpoint(text in arb_any_text()) {
        let key = sanitize_endpoint(&text);
        prop_assert_eq!(endpoint_from_key(&key), Some(text));
    }
}

// =============================================================================
// Path safety
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn key_has_no_path_delimiters(text in arb_any_text()) {
        let key = sanitize_endpoint(&text);
        for forbidden in ['/', '\\', '?', '#', '[', ']', '*', '.'] {
            prop_assert!(!key.contains(forbidden), "{key:?} contains {forbidden:?}");
        }
        prop_assert!(key.is_ascii());
    }

    #[test]
    fn every_endpoint_yields_a_document_path(endpoint in arb_endpoint()) {
        let path = PersistenceGateway::document_path("user-1", &endpoint).unwrap();
        prop_assert_eq!(path.collection(), "users/user-1/pushSubscriptions");
        prop_assert_eq!(path.id(), sanitize_endpoint(&endpoint));
    }
}
