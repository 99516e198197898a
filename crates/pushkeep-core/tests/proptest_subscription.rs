//! Property-based tests for the subscription normalizer and push payload
//! parsing.
//!
//! The normalizer must return `None` (never panic) for anything missing a
//! string endpoint or either key; payload parsing must always produce
//! non-empty text.

use proptest::prelude::*;
use serde_json::{Map, Value, json};

use pushkeep_core::delivery::{NotificationDefaults, PushContent};
use pushkeep_core::subscription::{normalize, normalize_str};

// =============================================================================
// Strategies
// =============================================================================

fn arb_json_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,40}".prop_map(Value::String),
    ]
}

/// Arbitrary JSON up to a few levels deep.
fn arb_json() -> impl Strategy<Value = Value> {
    arb_json_leaf().prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,10}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<String, Value>>())),
        ]
    })
}

fn arb_token() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_-]{1,60}"
}

/// Complete subscription JSON.
fn arb_subscription() -> impl Strategy<Value = Value> {
    (arb_token(), arb_token(), arb_token()).prop_map(|(id, auth, p256dh)| {
        json!({
            "endpoint": format!("https://web.push.apple.com/{id}"),
            "expirationTime": null,
            "keys": { "auth": auth, "p256dh": p256dh }
        })
    })
}

/// Which required field to break, and how.
#[derive(Debug, Clone, Copy)]
enum Breakage {
    RemoveEndpoint,
    RemoveAuth,
    RemoveP256dh,
    RemoveKeys,
    NumberEndpoint,
    NullAuth,
    EmptyP256dh,
}

fn arb_breakage() -> impl Strategy<Value = Breakage> {
    prop_oneof![
        Just(Breakage::RemoveEndpoint),
        Just(Breakage::RemoveAuth),
        Just(Breakage::RemoveP256dh),
        Just(Breakage::RemoveKeys),
        Just(Breakage::NumberEndpoint),
        Just(Breakage::NullAuth),
        Just(Breakage::EmptyP256dh),
    ]
}

fn break_subscription(mut sub: Value, breakage: Breakage) -> Value {
    let obj = sub.as_object_mut().expect("subscription is an object");
    match breakage {
        Breakage::RemoveEndpoint => {
            obj.remove("endpoint");
        }
        Breakage::RemoveKeys => {
            obj.remove("keys");
        }
        Breakage::NumberEndpoint => {
            obj.insert("endpoint".into(), json!(42));
        }
        Breakage::RemoveAuth
        | Breakage::RemoveP256dh
        | Breakage::NullAuth
        | Breakage::EmptyP256dh => {
            let keys = obj
                .get_mut("keys")
                .and_then(Value::as_object_mut)
                .expect("keys is an object");
            match breakage {
                Breakage::RemoveAuth => {
                    keys.remove("auth");
                }
                Breakage::RemoveP256dh => {
                    keys.remove("p256dh");
                }
                Breakage::NullAuth => {
                    keys.insert("auth".into(), Value::Null);
                }
                _ => {
                    keys.insert("p256dh".into(), json!(""));
                }
            }
        }
    }
    sub
}

// =============================================================================
// Normalizer
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn arbitrary_json_never_panics(value in arb_json()) {
        if let Some(sub) = normalize(&value) {
            prop_assert!(!sub.endpoint().is_empty());
            prop_assert!(!sub.keys().auth.is_empty());
            prop_assert!(!sub.keys().p256dh.is_empty());
        }
    }

    #[test]
    fn arbitrary_text_never_panics(text in ".{0,200}") {
        let _ = normalize_str(&text);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn complete_subscription_is_accepted(sub in arb_subscription()) {
        let normalized = normalize(&sub).unwrap();
        prop_assert_eq!(Some(normalized.endpoint()), sub["endpoint"].as_str());
    }

    #[test]
    fn missing_required_field_yields_none(sub in arb_subscription(), breakage in arb_breakage()) {
        let broken = break_subscription(sub, breakage);
        prop_assert!(normalize(&broken).is_none(), "{breakage:?} was accepted");
        prop_assert!(normalize_str(&broken.to_string()).is_none());
    }
}

// =============================================================================
// Push payloads
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn payload_always_has_text(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let content = PushContent::parse(Some(&bytes), &NotificationDefaults::default());
        prop_assert!(!content.title.trim().is_empty());
        prop_assert!(!content.body.trim().is_empty());
        prop_assert!(!content.url.is_empty());
    }

    #[test]
    fn json_payload_always_has_text(value in arb_json()) {
        let bytes = serde_json::to_vec(&value).unwrap();
        let content = PushContent::parse(Some(&bytes), &NotificationDefaults::default());
        prop_assert!(!content.title.trim().is_empty());
        prop_assert!(!content.body.trim().is_empty());
    }
}
