//! Subscription data model and the fail-closed normalizer.
//!
//! Everything that reaches the store goes through [`normalize`]. It returns
//! `None` for any payload without a string `endpoint`, `keys.auth` and
//! `keys.p256dh`, so partial records cannot be constructed outside this
//! module.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::platform::PlatformFlags;

/// Encryption material issued with a subscription (URL-safe base64 strings).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub auth: String,
    pub p256dh: String,
}

/// A live subscription handed out by the platform push manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformSubscription {
    pub endpoint: String,
    pub expiration_time: Option<i64>,
    /// Raw key material; a platform may omit either key.
    pub auth: Option<String>,
    pub p256dh: Option<String>,
}

impl PlatformSubscription {
    /// Serialized form, shaped like `PushSubscription.toJSON()`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut keys = serde_json::Map::new();
        if let Some(auth) = &self.auth {
            keys.insert("auth".to_string(), Value::String(auth.clone()));
        }
        if let Some(p256dh) = &self.p256dh {
            keys.insert("p256dh".to_string(), Value::String(p256dh.clone()));
        }
        serde_json::json!({
            "endpoint": self.endpoint,
            "expirationTime": self.expiration_time,
            "keys": keys,
        })
    }
}

/// Validated subscription: endpoint plus both keys.
///
/// Only [`normalize`] (and its wrappers) can build one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedSubscription {
    endpoint: String,
    expiration_time: Option<i64>,
    keys: SubscriptionKeys,
}

impl NormalizedSubscription {
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[must_use]
    pub fn keys(&self) -> &SubscriptionKeys {
        &self.keys
    }

    #[must_use]
    pub fn expiration_time(&self) -> Option<i64> {
        self.expiration_time
    }

    /// Wire form used by the relay and by `STORE_PUSH_METADATA` consumers.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "endpoint": self.endpoint,
            "expirationTime": self.expiration_time,
            "keys": { "auth": self.keys.auth, "p256dh": self.keys.p256dh },
        })
    }
}

/// Canonical record as stored at `users/{uid}/pushSubscriptions/{key}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscriptionRecord {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<i64>,
    #[serde(default)]
    pub platform_flags: PlatformFlags,
    #[serde(default)]
    pub user_agent: String,
    /// RFC 3339 timestamps assigned by the store on write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Normalize a serialized subscription. Never panics.
#[must_use]
pub fn normalize(payload: &Value) -> Option<NormalizedSubscription> {
    let endpoint = non_empty_str(payload.get("endpoint"))?;
    let keys = payload.get("keys")?;
    let auth = non_empty_str(keys.get("auth"))?;
    let p256dh = non_empty_str(keys.get("p256dh"))?;
    let expiration_time = payload.get("expirationTime").and_then(Value::as_i64);

    Some(NormalizedSubscription {
        endpoint: endpoint.to_string(),
        expiration_time,
        keys: SubscriptionKeys {
            auth: auth.to_string(),
            p256dh: p256dh.to_string(),
        },
    })
}

/// Normalize JSON text; unparsable text yields `None`.
#[must_use]
pub fn normalize_str(raw: &str) -> Option<NormalizedSubscription> {
    serde_json::from_str::<Value>(raw)
        .ok()
        .as_ref()
        .and_then(normalize)
}

/// Normalize a live platform subscription.
#[must_use]
pub fn normalize_live(subscription: &PlatformSubscription) -> Option<NormalizedSubscription> {
    normalize(&subscription.to_json())
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}
