//! Persistence gateway for subscription records.
//!
//! Records live at `users/{userId}/pushSubscriptions/{key}` where `key` is
//! the escaped endpoint, so re-persisting the same endpoint always hits the
//! same document. Writes are merges: concurrent writers (a renewal racing a
//! manual re-sync, two tabs acquiring at once) only overwrite the fields
//! they send.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::error::{Error, Result, StoreError};
use crate::identity::sanitize_endpoint;
use crate::platform::PlatformFlags;
use crate::store::{DocumentPath, DocumentStore, DocumentWrite};
use crate::subscription::{NormalizedSubscription, PushSubscriptionRecord};

/// Per-user collection name.
pub const SUBSCRIPTIONS_COLLECTION: &str = "pushSubscriptions";

/// Diagnostic context written with each record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordContext {
    pub platform_flags: PlatformFlags,
    pub user_agent: String,
}

/// Result of replacing a superseded subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceOutcome {
    /// Whether the record for the old endpoint was removed (or there was none).
    pub old_removed: bool,
}

/// Future returned by [`SubscriptionPersister`] operations.
pub type PersistFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Write path used by the renewal handler.
///
/// Implemented by [`PersistenceGateway`] (direct store access) and by the
/// HTTP relay client for deployments where the worker cannot reach the
/// store.
pub trait SubscriptionPersister: Send + Sync {
    /// Persist `subscription`, then best-effort remove `old_endpoint`.
    ///
    /// Fails only when the new record could not be written.
    fn replace<'a>(
        &'a self,
        user_id: &'a str,
        subscription: &'a NormalizedSubscription,
        context: &'a RecordContext,
        old_endpoint: Option<&'a str>,
    ) -> PersistFuture<'a, ReplaceOutcome>;
}

/// Direct store access.
#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn DocumentStore>,
}

impl std::fmt::Debug for PersistenceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceGateway").finish_non_exhaustive()
    }
}

impl PersistenceGateway {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Collection path for a user's subscriptions.
    #[must_use]
    pub fn collection_for(user_id: &str) -> String {
        format!("users/{user_id}/{SUBSCRIPTIONS_COLLECTION}")
    }

    /// Document path for a user's endpoint.
    pub fn document_path(user_id: &str, endpoint: &str) -> Result<DocumentPath> {
        if user_id.is_empty() || user_id.contains('/') {
            return Err(StoreError::InvalidPath(format!("users/{user_id}")).into());
        }
        Ok(DocumentPath::new(
            Self::collection_for(user_id),
            sanitize_endpoint(endpoint),
        )?)
    }

    /// Merge-upsert the record for `subscription.endpoint()`.
    pub async fn upsert(
        &self,
        user_id: &str,
        subscription: &NormalizedSubscription,
        context: &RecordContext,
    ) -> Result<DocumentPath> {
        let path = Self::document_path(user_id, subscription.endpoint())?;
        let mut fields = serde_json::Map::new();
        fields.insert("endpoint".into(), json!(subscription.endpoint()));
        fields.insert(
            "keys".into(),
            json!({
                "auth": subscription.keys().auth,
                "p256dh": subscription.keys().p256dh,
            }),
        );
        if let Some(expiration) = subscription.expiration_time() {
            fields.insert("expirationTime".into(), json!(expiration));
        }
        fields.insert(
            "platformFlags".into(),
            serde_json::to_value(context.platform_flags)?,
        );
        fields.insert("userAgent".into(), json!(context.user_agent));

        let write = DocumentWrite::new(fields)
            .created_at("createdAt")
            .updated_at("updatedAt");
        self.store.merge(&path, write).await?;

        tracing::info!(
            user_id,
            endpoint_key = path.id(),
            "push subscription persisted"
        );
        Ok(path)
    }

    /// Delete the record for `endpoint`.
    pub async fn delete(&self, user_id: &str, endpoint: &str) -> Result<()> {
        let path = Self::document_path(user_id, endpoint)?;
        self.store.delete(&path).await?;
        tracing::info!(user_id, endpoint_key = path.id(), "push subscription deleted");
        Ok(())
    }

    /// Records currently stored for a user. Documents that fail to decode
    /// are skipped with a warning.
    pub async fn list(&self, user_id: &str) -> Result<Vec<PushSubscriptionRecord>> {
        let collection = Self::collection_for(user_id);
        let docs = self.store.list(&collection).await?;
        let mut records = Vec::with_capacity(docs.len());
        for (id, fields) in docs {
            match serde_json::from_value::<PushSubscriptionRecord>(Value::Object(fields)) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!(
                        user_id,
                        endpoint_key = %id,
                        error = %err,
                        "skipping undecodable subscription record"
                    );
                }
            }
        }
        Ok(records)
    }

    /// Fetch the record for an endpoint.
    pub async fn get(
        &self,
        user_id: &str,
        endpoint: &str,
    ) -> Result<Option<PushSubscriptionRecord>> {
        let path = Self::document_path(user_id, endpoint)?;
        match self.store.get(&path).await? {
            Some(fields) => Ok(Some(serde_json::from_value(Value::Object(fields))?)),
            None => Ok(None),
        }
    }
}

impl SubscriptionPersister for PersistenceGateway {
    fn replace<'a>(
        &'a self,
        user_id: &'a str,
        subscription: &'a NormalizedSubscription,
        context: &'a RecordContext,
        old_endpoint: Option<&'a str>,
    ) -> PersistFuture<'a, ReplaceOutcome> {
        Box::pin(async move {
            self.upsert(user_id, subscription, context).await?;

            let old_removed = match old_endpoint {
                Some(old) if old != subscription.endpoint() => {
                    match self.delete(user_id, old).await {
                        Ok(()) => true,
                        Err(err) => {
                            tracing::warn!(
                                user_id,
                                error = %err,
                                "failed to delete superseded subscription; leaving it in place"
                            );
                            false
                        }
                    }
                }
                _ => true,
            };
            Ok::<_, Error>(ReplaceOutcome { old_removed })
        })
    }
}
