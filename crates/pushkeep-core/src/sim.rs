//! In-process fakes for every platform seam.
//!
//! Used by the test suites and by `pushkeep simulate`. The push manager
//! mints endpoints `{base}/E1`, `{base}/E2`, ... and can rotate them the
//! way mobile Safari does when it invalidates a subscription in the
//! background.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use tokio::task::JoinHandle;

use crate::acquisition::AcquisitionFlow;
use crate::clients::{ClientConnection, ClientRegistry};
use crate::delivery::{DeliveryHandler, NotificationDefaults, NotificationRequest};
use crate::error::{Error, Result};
use crate::gateway::PersistenceGateway;
use crate::messages::WorkerMessage;
use crate::metadata::RenewalMetadataCache;
use crate::notifier::{ForegroundNotifier, Notice};
use crate::platform::PlatformInfo;
use crate::platform_api::{
    Capabilities, ForegroundPlatform, Navigator, NotificationId, NotificationSurface,
    PermissionApi, PermissionState, PlatformFuture, PushManager, UserProvider,
    WorkerRegistration, WorkerRegistry,
};
use crate::renewal::RenewalHandler;
use crate::store::MemoryStore;
use crate::subscription::PlatformSubscription;
use crate::vapid::ApplicationServerKey;
use crate::worker::{BackgroundWorker, EventReport, WorkerEvent, WorkerHandle};
use crate::worker_storage::{MemoryStorage, WorkerStorage};

/// Endpoint prefix used by [`SimPushManager::new`].
pub const SIM_ENDPOINT_BASE: &str = "https://web.push.apple.com/sim";

/// A well-formed application server key for simulated runs.
#[must_use]
pub fn sim_server_key() -> String {
    let mut bytes = vec![0x04_u8];
    bytes.extend((1..=64_u8).map(|b| b.wrapping_mul(31)));
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Permission prompt with a scripted answer.
#[derive(Debug)]
pub struct SimPermission {
    answer: Mutex<PermissionState>,
    current: Mutex<PermissionState>,
    requests: AtomicUsize,
}

impl SimPermission {
    /// A prompt that resolves to `answer`.
    #[must_use]
    pub fn answering(answer: PermissionState) -> Self {
        Self {
            answer: Mutex::new(answer),
            current: Mutex::new(PermissionState::Default),
            requests: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn granting() -> Self {
        Self::answering(PermissionState::Granted)
    }

    #[must_use]
    pub fn denying() -> Self {
        Self::answering(PermissionState::Denied)
    }

    /// Change the decision from outside the page, as the browser settings
    /// do. Later prompts answer `answer`.
    pub fn reset(&self, current: PermissionState, answer: PermissionState) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = current;
        *self.answer.lock().unwrap_or_else(|e| e.into_inner()) = answer;
    }

    /// How many times the prompt was shown.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl PermissionApi for SimPermission {
    fn current(&self) -> PermissionState {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn request(&self) -> PlatformFuture<'_, PermissionState> {
        Box::pin(async move {
            self.requests.fetch_add(1, Ordering::SeqCst);
            let answer = *self.answer.lock().unwrap_or_else(|e| e.into_inner());
            *self.current.lock().unwrap_or_else(|e| e.into_inner()) = answer;
            Ok(answer)
        })
    }
}

#[derive(Debug, Default)]
struct PushState {
    current: Option<PlatformSubscription>,
    subscribe_key: Option<Vec<u8>>,
    minted: u64,
    fail_subscribe: bool,
    omit_p256dh: bool,
}

/// Push manager that mints sequential endpoints.
#[derive(Debug)]
pub struct SimPushManager {
    base: String,
    state: Mutex<PushState>,
    subscribe_calls: AtomicUsize,
}

impl Default for SimPushManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SimPushManager {
    #[must_use]
    pub fn new() -> Self {
        Self::with_base(SIM_ENDPOINT_BASE)
    }

    #[must_use]
    pub fn with_base(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            state: Mutex::new(PushState::default()),
            subscribe_calls: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PushState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Endpoint for the n-th minted subscription.
    #[must_use]
    pub fn endpoint(&self, n: u64) -> String {
        format!("{}/E{n}", self.base)
    }

    /// Make subsequent `subscribe` calls fail.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.lock().fail_subscribe = fail;
    }

    /// Mint subscriptions without a `p256dh` key.
    pub fn set_omit_p256dh(&self, omit: bool) {
        self.lock().omit_p256dh = omit;
    }

    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// The live subscription, if any.
    #[must_use]
    pub fn current(&self) -> Option<PlatformSubscription> {
        self.lock().current.clone()
    }

    /// Invalidate the live subscription the way the platform does in the
    /// background. Returns the subscription that was dropped; the caller
    /// delivers it as the old subscription of a change event.
    pub fn invalidate(&self) -> Option<PlatformSubscription> {
        let mut state = self.lock();
        state.subscribe_key = None;
        state.current.take()
    }

    fn mint(&self, state: &mut PushState) -> PlatformSubscription {
        state.minted += 1;
        let n = state.minted;
        PlatformSubscription {
            endpoint: self.endpoint(n),
            expiration_time: None,
            auth: Some(URL_SAFE_NO_PAD.encode(format!("auth-{n}"))),
            p256dh: (!state.omit_p256dh).then(|| URL_SAFE_NO_PAD.encode(format!("p256dh-{n}"))),
        }
    }
}

impl PushManager for SimPushManager {
    fn get_subscription(&self) -> PlatformFuture<'_, Option<PlatformSubscription>> {
        Box::pin(async move { Ok(self.current()) })
    }

    fn subscribe<'a>(
        &'a self,
        key: &'a ApplicationServerKey,
    ) -> PlatformFuture<'a, PlatformSubscription> {
        Box::pin(async move {
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            let mut state = self.lock();
            if state.fail_subscribe {
                return Err(Error::UnsupportedPlatform(
                    "push service refused the subscription".to_string(),
                ));
            }
            if let Some(current) = &state.current {
                if state.subscribe_key.as_deref() == Some(key.as_bytes()) {
                    return Ok(current.clone());
                }
                return Err(Error::InvalidServerKey(
                    "a subscription with a different application server key exists".to_string(),
                ));
            }
            let minted = self.mint(&mut state);
            state.current = Some(minted.clone());
            state.subscribe_key = Some(key.as_bytes().to_vec());
            Ok(minted)
        })
    }

    fn unsubscribe(&self) -> PlatformFuture<'_, bool> {
        Box::pin(async move {
            let mut state = self.lock();
            state.subscribe_key = None;
            Ok(state.current.take().is_some())
        })
    }
}

/// Worker registry with an optional registration.
pub struct SimWorkerRegistry {
    registration: Mutex<Option<Arc<dyn WorkerRegistration>>>,
}

impl std::fmt::Debug for SimWorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registered = self
            .registration
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some();
        f.debug_struct("SimWorkerRegistry")
            .field("registered", &registered)
            .finish()
    }
}

impl SimWorkerRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            registration: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with(registration: Arc<dyn WorkerRegistration>) -> Self {
        Self {
            registration: Mutex::new(Some(registration)),
        }
    }

    pub fn register(&self, registration: Arc<dyn WorkerRegistration>) {
        *self.registration.lock().unwrap_or_else(|e| e.into_inner()) = Some(registration);
    }
}

impl WorkerRegistry for SimWorkerRegistry {
    fn registration(&self) -> PlatformFuture<'_, Option<Arc<dyn WorkerRegistration>>> {
        Box::pin(async move {
            Ok(self
                .registration
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone())
        })
    }
}

/// Registration that records posted messages instead of delivering them.
pub struct RecordingRegistration {
    push: Arc<dyn PushManager>,
    posted: Mutex<Vec<WorkerMessage>>,
}

impl std::fmt::Debug for RecordingRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingRegistration")
            .field("posted", &self.posted())
            .finish_non_exhaustive()
    }
}

impl RecordingRegistration {
    #[must_use]
    pub fn new(push: Arc<dyn PushManager>) -> Self {
        Self {
            push,
            posted: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn posted(&self) -> Vec<WorkerMessage> {
        self.posted.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl WorkerRegistration for RecordingRegistration {
    fn push_manager(&self) -> Arc<dyn PushManager> {
        Arc::clone(&self.push)
    }

    fn post_message(&self, message: WorkerMessage) -> Result<()> {
        self.posted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message);
        Ok(())
    }
}

/// Notification surface that records what was shown and closed.
#[derive(Debug, Default)]
pub struct SimNotificationSurface {
    shown: Mutex<Vec<(NotificationId, NotificationRequest)>>,
    closed: Mutex<Vec<NotificationId>>,
    next_id: AtomicU64,
}

impl SimNotificationSurface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shown(&self) -> Vec<NotificationRequest> {
        self.shown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    /// The request shown under `id`.
    #[must_use]
    pub fn get(&self, id: NotificationId) -> Option<NotificationRequest> {
        self.shown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|(shown_id, _)| *shown_id == id)
            .map(|(_, request)| request.clone())
    }

    #[must_use]
    pub fn closed(&self) -> Vec<NotificationId> {
        self.closed.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl NotificationSurface for SimNotificationSurface {
    fn show<'a>(&'a self, request: &'a NotificationRequest) -> PlatformFuture<'a, NotificationId> {
        Box::pin(async move {
            let id = NotificationId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
            self.shown
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((id, request.clone()));
            Ok(id)
        })
    }

    fn close(&self, id: NotificationId) -> PlatformFuture<'_, ()> {
        Box::pin(async move {
            self.closed
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(id);
            Ok(())
        })
    }
}

/// Fixed signed-in user (or none).
#[derive(Debug, Clone, Default)]
pub struct SimUser(pub Option<String>);

impl SimUser {
    #[must_use]
    pub fn signed_in(user_id: &str) -> Self {
        Self(Some(user_id.to_string()))
    }
}

impl UserProvider for SimUser {
    fn current_user_id(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Navigator that records requested URLs.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    visited: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, url: &str) {
        self.visited
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_string());
    }
}

/// Knobs for [`SimWorld::start`].
#[derive(Debug, Clone)]
pub struct SimOptions {
    pub user_id: String,
    pub permission: PermissionState,
    pub info: PlatformInfo,
    pub user_agent: String,
    pub vapid_public_key: String,
    pub defaults: NotificationDefaults,
    pub page_url: String,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            user_id: "sim-user".to_string(),
            permission: PermissionState::Granted,
            info: PlatformInfo {
                is_target_browser_engine: true,
                is_standalone_installed: true,
            },
            user_agent: "pushkeep-sim".to_string(),
            vapid_public_key: sim_server_key(),
            defaults: NotificationDefaults::default(),
            page_url: "/".to_string(),
        }
    }
}

/// A page, a running worker and an in-memory store wired together.
///
/// Must be started inside a tokio runtime.
pub struct SimWorld {
    pub store: Arc<MemoryStore>,
    pub push: Arc<SimPushManager>,
    pub permission: Arc<SimPermission>,
    pub surface: Arc<SimNotificationSurface>,
    pub clients: Arc<ClientRegistry>,
    pub navigator: Arc<RecordingNavigator>,
    pub worker_storage: Arc<dyn WorkerStorage>,
    pub worker: WorkerHandle,
    pub worker_task: JoinHandle<()>,
    pub flow: AcquisitionFlow,
    pub notifier: ForegroundNotifier,
    pub page: ClientConnection,
    pub user_id: String,
    platform: ForegroundPlatform,
    gateway: PersistenceGateway,
    vapid_public_key: String,
}

impl std::fmt::Debug for SimWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimWorld")
            .field("user_id", &self.user_id)
            .field("flow", &self.flow)
            .finish_non_exhaustive()
    }
}

impl SimWorld {
    #[must_use]
    pub fn start(options: SimOptions) -> Self {
        let store = Arc::new(MemoryStore::new());
        let push = Arc::new(SimPushManager::new());
        let permission = Arc::new(SimPermission::answering(options.permission));
        let surface = Arc::new(SimNotificationSurface::new());
        let clients = Arc::new(ClientRegistry::new());
        let navigator = Arc::new(RecordingNavigator::new());
        let worker_storage: Arc<dyn WorkerStorage> = Arc::new(MemoryStorage::new());
        let gateway = PersistenceGateway::new(store.clone());

        let cache = RenewalMetadataCache::new(Arc::clone(&worker_storage));
        let renewal = RenewalHandler::new(
            cache.clone(),
            push.clone(),
            Arc::new(gateway.clone()),
            clients.clone(),
        )
        .with_user_agent(options.user_agent.clone());
        let delivery = DeliveryHandler::new(
            surface.clone(),
            clients.clone(),
            options.info,
            options.defaults.clone(),
        );
        let (worker, worker_task) =
            BackgroundWorker::new(cache, renewal, delivery, clients.clone(), push.clone()).spawn();

        let platform = ForegroundPlatform {
            info: options.info,
            capabilities: Capabilities::default(),
            user_agent: options.user_agent,
            permission: permission.clone(),
            workers: Arc::new(SimWorkerRegistry::with(Arc::new(worker.clone()))),
            user: Arc::new(SimUser::signed_in(&options.user_id)),
        };
        let flow = AcquisitionFlow::new(
            platform.clone(),
            gateway.clone(),
            options.vapid_public_key.clone(),
        );
        let notifier = ForegroundNotifier::new(flow.state_handle(), navigator.clone());
        let page = clients.connect(&options.page_url);

        Self {
            store,
            push,
            permission,
            surface,
            clients,
            navigator,
            worker_storage,
            worker,
            worker_task,
            flow,
            notifier,
            page,
            user_id: options.user_id,
            platform,
            gateway,
            vapid_public_key: options.vapid_public_key,
        }
    }

    /// Another page for the same user: a reload or a second tab. It shares
    /// the store, the push manager and the worker, and starts with no
    /// local state of its own.
    #[must_use]
    pub fn open_tab(&self) -> AcquisitionFlow {
        AcquisitionFlow::new(
            self.platform.clone(),
            self.gateway.clone(),
            self.vapid_public_key.clone(),
        )
    }

    /// Collection holding this user's records.
    #[must_use]
    pub fn collection(&self) -> String {
        PersistenceGateway::collection_for(&self.user_id)
    }

    /// Invalidate the live subscription and deliver the change event.
    ///
    /// Worker events are handled in order, so metadata posted by an earlier
    /// `enable` is cached before this change is processed.
    pub async fn rotate(&self) -> Result<EventReport> {
        let old = self.push.invalidate();
        self.worker
            .request(WorkerEvent::SubscriptionChange {
                old_endpoint: old.map(|s| s.endpoint),
            })
            .await
    }

    /// Apply every broadcast the page has received so far.
    pub fn drain_page(&mut self) -> Vec<Notice> {
        let mut notices = Vec::new();
        while let Ok(message) = self.page.inbox.try_recv() {
            if let Some(notice) = self.notifier.handle(&message) {
                notices.push(notice);
            }
        }
        notices
    }
}
