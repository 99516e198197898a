//! Background renewal after the platform invalidates a subscription.
//!
//! Runs inside the worker with no session: the cached [`RenewalMetadata`]
//! is the only source for the user and the server key. One resubscribe,
//! one write, one best-effort delete. Every outcome except a missing cache
//! ends in a broadcast, so a failure is never silently swallowed.
//!
//! [`RenewalMetadata`]: crate::metadata::RenewalMetadata

use std::sync::Arc;

use crate::clients::ClientRegistry;
use crate::error::{Error, Result};
use crate::gateway::{RecordContext, ReplaceOutcome, SubscriptionPersister};
use crate::messages::ClientMessage;
use crate::metadata::RenewalMetadataCache;
use crate::platform_api::PushManager;
use crate::subscription::{NormalizedSubscription, normalize_live};
use crate::vapid::ApplicationServerKey;

/// What a renewal attempt ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalOutcome {
    Renewed {
        endpoint: String,
        old_endpoint: Option<String>,
        old_removed: bool,
    },
    /// Nothing cached yet; nothing persisted or broadcast.
    SkippedNoMetadata,
    Failed {
        error: String,
    },
}

pub struct RenewalHandler {
    cache: RenewalMetadataCache,
    push: Arc<dyn PushManager>,
    persister: Arc<dyn SubscriptionPersister>,
    clients: Arc<ClientRegistry>,
    user_agent: String,
}

impl std::fmt::Debug for RenewalHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalHandler")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl RenewalHandler {
    #[must_use]
    pub fn new(
        cache: RenewalMetadataCache,
        push: Arc<dyn PushManager>,
        persister: Arc<dyn SubscriptionPersister>,
        clients: Arc<ClientRegistry>,
    ) -> Self {
        Self {
            cache,
            push,
            persister,
            clients,
            user_agent: String::new(),
        }
    }

    /// User agent recorded with renewed subscriptions.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Handle a subscription-change event. `old_endpoint` is the endpoint
    /// of the subscription the platform dropped, when it says so.
    pub async fn handle(&self, old_endpoint: Option<&str>) -> RenewalOutcome {
        match self.renew(old_endpoint).await {
            Ok(Some((subscription, outcome))) => {
                let endpoint = subscription.endpoint().to_string();
                let delivered = self.clients.broadcast(&ClientMessage::renewed(
                    &endpoint,
                    old_endpoint,
                    outcome.old_removed,
                ));
                tracing::info!(
                    old_removed = outcome.old_removed,
                    clients = delivered,
                    "push subscription renewed"
                );
                RenewalOutcome::Renewed {
                    endpoint,
                    old_endpoint: old_endpoint.map(str::to_string),
                    old_removed: outcome.old_removed,
                }
            }
            Ok(None) => {
                tracing::info!("{}", Error::RenewalWithoutMetadata);
                RenewalOutcome::SkippedNoMetadata
            }
            Err(err) => {
                tracing::error!(error = %err, "push subscription renewal failed");
                self.clients
                    .broadcast(&ClientMessage::renewal_failed(err.to_string()));
                RenewalOutcome::Failed {
                    error: err.to_string(),
                }
            }
        }
    }

    async fn renew(
        &self,
        old_endpoint: Option<&str>,
    ) -> Result<Option<(NormalizedSubscription, ReplaceOutcome)>> {
        let Some(metadata) = self.cache.load().await? else {
            return Ok(None);
        };
        let key = ApplicationServerKey::from_base64url(&metadata.vapid_public_key)?;
        let live = self.push.subscribe(&key).await?;
        let subscription = normalize_live(&live).ok_or_else(|| {
            Error::MalformedPayload("renewed subscription is missing endpoint or keys".into())
        })?;
        let context = RecordContext {
            platform_flags: metadata.platform_flags,
            user_agent: self.user_agent.clone(),
        };
        let outcome = self
            .persister
            .replace(&metadata.user_id, &subscription, &context, old_endpoint)
            .await?;
        Ok(Some((subscription, outcome)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::PersistenceGateway;
    use crate::messages::SubscriptionChange;
    use crate::metadata::{PushMetadata, RenewalMetadata};
    use crate::platform::PlatformFlags;
    use crate::sim::SimPushManager;
    use crate::store::MemoryStore;
    use crate::vapid::test_key;
    use crate::worker_storage::MemoryStorage;

    struct Harness {
        store: Arc<MemoryStore>,
        push: Arc<SimPushManager>,
        cache: RenewalMetadataCache,
        clients: Arc<ClientRegistry>,
        handler: RenewalHandler,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let push = Arc::new(SimPushManager::new());
        let cache = RenewalMetadataCache::new(Arc::new(MemoryStorage::new()));
        let clients = Arc::new(ClientRegistry::new());
        let handler = RenewalHandler::new(
            cache.clone(),
            push.clone(),
            Arc::new(PersistenceGateway::new(store.clone())),
            clients.clone(),
        );
        Harness {
            store,
            push,
            cache,
            clients,
            handler,
        }
    }

    async fn seed_metadata(cache: &RenewalMetadataCache) {
        cache
            .store(&RenewalMetadata::stamped(PushMetadata {
                user_id: "u1".to_string(),
                vapid_public_key: test_key(),
                platform_flags: PlatformFlags {
                    is_ios_safari: true,
                },
            }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn without_metadata_nothing_happens() {
        let h = harness();
        let mut page = h.clients.connect("/");
        let outcome = h.handler.handle(Some("https://old/E1")).await;
        assert_eq!(outcome, RenewalOutcome::SkippedNoMetadata);
        assert_eq!(h.store.write_count(), 0);
        assert_eq!(h.store.delete_count(), 0);
        assert_eq!(h.push.subscribe_calls(), 0);
        assert!(page.inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn renewal_replaces_and_broadcasts() {
        let h = harness();
        seed_metadata(&h.cache).await;
        let mut page = h.clients.connect("/");

        let outcome = h.handler.handle(Some("https://old/E1")).await;
        let RenewalOutcome::Renewed { endpoint, old_removed, .. } = &outcome else {
            panic!("expected renewal, got {outcome:?}");
        };
        assert_eq!(endpoint, &h.push.endpoint(1));
        assert!(*old_removed);
        assert_eq!(h.push.subscribe_calls(), 1);
        assert_eq!(h.store.count("users/u1/pushSubscriptions"), 1);
        assert_eq!(h.store.delete_count(), 1);

        match page.inbox.try_recv().unwrap() {
            ClientMessage::PushSubscriptionChange {
                payload: SubscriptionChange::SubscriptionRenewed { endpoint, old_endpoint, .. },
            } => {
                assert_eq!(endpoint, h.push.endpoint(1));
                assert_eq!(old_endpoint.as_deref(), Some("https://old/E1"));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_failure_is_tolerated() {
        let h = harness();
        seed_metadata(&h.cache).await;
        h.store.set_fail_deletes(true);
        let outcome = h.handler.handle(Some("https://old/E1")).await;
        assert!(matches!(outcome, RenewalOutcome::Renewed { old_removed: false, .. }));
    }

    #[tokio::test]
    async fn failures_become_error_broadcasts() {
        let h = harness();
        seed_metadata(&h.cache).await;
        h.store.set_fail_writes(true);
        let mut page = h.clients.connect("/");

        let outcome = h.handler.handle(None).await;
        assert!(matches!(outcome, RenewalOutcome::Failed { .. }));
        assert_eq!(h.store.delete_count(), 0);
        match page.inbox.try_recv().unwrap() {
            ClientMessage::PushSubscriptionChange {
                payload: SubscriptionChange::SubscriptionError { error },
            } => assert!(error.contains("Persistence")),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn subscribe_failure_is_broadcast() {
        let h = harness();
        seed_metadata(&h.cache).await;
        h.push.set_fail_subscribe(true);
        let mut page = h.clients.connect("/");
        let outcome = h.handler.handle(None).await;
        assert!(matches!(outcome, RenewalOutcome::Failed { .. }));
        assert!(page.inbox.try_recv().is_ok());
        assert_eq!(h.store.write_count(), 0);
    }
}
