//! Background worker runtime.
//!
//! A single task owns the metadata cache and the renewal and delivery
//! handlers and consumes [`WorkerEvent`]s in arrival order. Handlers never
//! take the loop down: failures are logged, renewal failures are broadcast,
//! and every outcome goes back to callers that asked for a reply.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::clients::ClientRegistry;
use crate::config::Config;
use crate::delivery::{ClickOutcome, DeliveryHandler};
use crate::error::{Error, Result};
use crate::gateway::{PersistenceGateway, SubscriptionPersister};
use crate::messages::WorkerMessage;
use crate::metadata::{RenewalMetadata, RenewalMetadataCache};
use crate::platform::PlatformInfo;
use crate::platform_api::{NotificationId, NotificationSurface, PushManager, WorkerRegistration};
use crate::relay::RelayClient;
use crate::renewal::{RenewalHandler, RenewalOutcome};
use crate::store::DocumentStore;
use crate::worker_storage::{FileStorage, MemoryStorage, WorkerStorage};

/// Inputs delivered to the worker by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Directed message from a page.
    Message(WorkerMessage),
    /// The platform dropped (or is about to drop) the subscription.
    SubscriptionChange { old_endpoint: Option<String> },
    /// Inbound push with its raw payload.
    Push { data: Option<Vec<u8>> },
    /// The user clicked a notification; `url` comes from its data.
    NotificationClick {
        id: NotificationId,
        url: Option<String>,
    },
}

impl WorkerEvent {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::SubscriptionChange { .. } => "pushsubscriptionchange",
            Self::Push { .. } => "push",
            Self::NotificationClick { .. } => "notificationclick",
        }
    }
}

/// What handling one event produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventReport {
    MetadataStored,
    Renewal(RenewalOutcome),
    Shown(NotificationId),
    Clicked(ClickOutcome),
    Failed(String),
}

type Envelope = (WorkerEvent, Option<oneshot::Sender<EventReport>>);

/// Host services the worker runs against.
#[derive(Clone)]
pub struct WorkerHost {
    pub store: Arc<dyn DocumentStore>,
    pub push: Arc<dyn PushManager>,
    pub surface: Arc<dyn NotificationSurface>,
    pub clients: Arc<ClientRegistry>,
    pub info: PlatformInfo,
    pub user_agent: String,
}

/// The worker's state and handlers.
pub struct BackgroundWorker {
    cache: RenewalMetadataCache,
    renewal: RenewalHandler,
    delivery: DeliveryHandler,
    clients: Arc<ClientRegistry>,
    push: Arc<dyn PushManager>,
}

impl std::fmt::Debug for BackgroundWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundWorker")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl BackgroundWorker {
    #[must_use]
    pub fn new(
        cache: RenewalMetadataCache,
        renewal: RenewalHandler,
        delivery: DeliveryHandler,
        clients: Arc<ClientRegistry>,
        push: Arc<dyn PushManager>,
    ) -> Self {
        Self {
            cache,
            renewal,
            delivery,
            clients,
            push,
        }
    }

    /// Build a worker from configuration.
    ///
    /// `worker.storage_dir` selects file-backed metadata (in-memory when
    /// unset); `push.relay_url` routes renewal writes through the relay
    /// instead of the store.
    pub fn from_config(config: &Config, host: WorkerHost) -> Result<Self> {
        let storage: Arc<dyn WorkerStorage> = match &config.worker.storage_dir {
            Some(dir) => Arc::new(FileStorage::open(dir)?),
            None => Arc::new(MemoryStorage::new()),
        };
        let cache = RenewalMetadataCache::with_key(storage, config.worker.metadata_key.clone());

        let persister: Arc<dyn SubscriptionPersister> = match &config.push.relay_url {
            Some(url) => {
                tracing::info!(relay_url = %url, "renewal writes go through the relay");
                Arc::new(RelayClient::new(url, config.push.relay_timeout())?)
            }
            None => Arc::new(PersistenceGateway::new(host.store)),
        };
        let renewal = RenewalHandler::new(
            cache.clone(),
            Arc::clone(&host.push),
            persister,
            Arc::clone(&host.clients),
        )
        .with_user_agent(host.user_agent);
        let delivery = DeliveryHandler::new(
            host.surface,
            Arc::clone(&host.clients),
            host.info,
            config.notifications.clone(),
        );
        Ok(Self::new(cache, renewal, delivery, host.clients, host.push))
    }

    /// Handle one event.
    pub async fn dispatch(&self, event: WorkerEvent) -> EventReport {
        let span = tracing::debug_span!("worker_event", kind = event.kind());
        self.handle_event(event).instrument(span).await
    }

    async fn handle_event(&self, event: WorkerEvent) -> EventReport {
        match event {
            WorkerEvent::Message(WorkerMessage::StorePushMetadata(metadata)) => {
                let user_id = metadata.user_id.clone();
                match self.cache.store(&RenewalMetadata::stamped(metadata)).await {
                    Ok(()) => EventReport::MetadataStored,
                    Err(err) => {
                        tracing::error!(
                            user_id = %user_id,
                            error = %err,
                            "failed to cache renewal metadata"
                        );
                        EventReport::Failed(err.to_string())
                    }
                }
            }
            WorkerEvent::SubscriptionChange { old_endpoint } => {
                EventReport::Renewal(self.renewal.handle(old_endpoint.as_deref()).await)
            }
            WorkerEvent::Push { data } => match self.delivery.handle_push(data.as_deref()).await {
                Ok(id) => EventReport::Shown(id),
                Err(err) => {
                    tracing::error!(error = %err, "failed to show push notification");
                    EventReport::Failed(err.to_string())
                }
            },
            WorkerEvent::NotificationClick { id, url } => {
                match self.delivery.handle_click(id, url.as_deref()).await {
                    Ok(outcome) => EventReport::Clicked(outcome),
                    Err(err) => {
                        tracing::error!(
                            notification_id = id.0,
                            error = %err,
                            "notification click failed"
                        );
                        EventReport::Failed(err.to_string())
                    }
                }
            }
        }
    }

    /// Spawn the event loop. The loop ends when every handle is dropped.
    pub fn spawn(self) -> (WorkerHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        let handle = WorkerHandle {
            tx,
            push: Arc::clone(&self.push),
            clients: Arc::clone(&self.clients),
        };
        let task = tokio::spawn(async move {
            tracing::info!("background worker started");
            while let Some((event, reply)) = rx.recv().await {
                let report = self.dispatch(event).await;
                if let Some(reply) = reply {
                    let _ = reply.send(report);
                }
            }
            tracing::info!("background worker stopped");
        });
        (handle, task)
    }
}

/// Cloneable sender side of a running worker. Also serves as the page's
/// view of the registration.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<Envelope>,
    push: Arc<dyn PushManager>,
    clients: Arc<ClientRegistry>,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("closed", &self.tx.is_closed())
            .finish_non_exhaustive()
    }
}

impl WorkerHandle {
    /// Deliver an event without waiting for it to be handled.
    pub fn send(&self, event: WorkerEvent) -> Result<()> {
        let kind = event.kind();
        self.tx
            .send((event, None))
            .map_err(|_| Error::ChannelClosed(format!("worker is gone; {kind} event dropped")))
    }

    /// Deliver an event and wait for its report.
    pub async fn request(&self, event: WorkerEvent) -> Result<EventReport> {
        let kind = event.kind();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((event, Some(reply_tx)))
            .map_err(|_| Error::ChannelClosed(format!("worker is gone; {kind} event dropped")))?;
        reply_rx
            .await
            .map_err(|_| Error::ChannelClosed(format!("worker dropped the {kind} reply")))
    }

    /// Window clients the worker broadcasts to.
    #[must_use]
    pub fn clients(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.clients)
    }
}

impl WorkerRegistration for WorkerHandle {
    fn push_manager(&self) -> Arc<dyn PushManager> {
        Arc::clone(&self.push)
    }

    fn post_message(&self, message: WorkerMessage) -> Result<()> {
        self.send(WorkerEvent::Message(message))
    }
}
