//! Foreground acquisition flow.
//!
//! `enable()` walks permission → registration → reuse-or-subscribe →
//! normalize → persist → `STORE_PUSH_METADATA`. The record is written
//! before the state becomes `Active`. Nothing here retries: a failure is
//! reported once and the user has to trigger the flow again.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::gateway::{PersistenceGateway, RecordContext};
use crate::messages::WorkerMessage;
use crate::metadata::PushMetadata;
use crate::platform_api::{ForegroundPlatform, PermissionState, WorkerRegistration};
use crate::state::{Lifecycle, SubscriptionState};
use crate::subscription::{NormalizedSubscription, normalize_live};
use crate::vapid::ApplicationServerKey;

/// Page-local view of the subscription, shared with the notifier.
#[derive(Debug, Default)]
pub struct ForegroundState {
    pub lifecycle: Lifecycle,
    /// Last endpoint this page persisted or was told about.
    pub endpoint: Option<String>,
}

pub type SharedForegroundState = Arc<Mutex<ForegroundState>>;

/// Outcome of [`AcquisitionFlow::enable`] / [`AcquisitionFlow::opt_out`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionReport {
    pub state: SubscriptionState,
    /// Single line for the UI.
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl AcquisitionReport {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == SubscriptionState::Active
    }
}

pub struct AcquisitionFlow {
    platform: ForegroundPlatform,
    gateway: PersistenceGateway,
    vapid_public_key: String,
    state: SharedForegroundState,
}

impl std::fmt::Debug for AcquisitionFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionFlow")
            .field("platform", &self.platform)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AcquisitionFlow {
    #[must_use]
    pub fn new(
        platform: ForegroundPlatform,
        gateway: PersistenceGateway,
        vapid_public_key: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            gateway,
            vapid_public_key: vapid_public_key.into(),
            state: Arc::new(Mutex::new(ForegroundState::default())),
        }
    }

    /// Handle for the notifier, which updates the same state.
    #[must_use]
    pub fn state_handle(&self) -> SharedForegroundState {
        Arc::clone(&self.state)
    }

    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.lock().lifecycle.state()
    }

    #[must_use]
    pub fn endpoint(&self) -> Option<String> {
        self.lock().endpoint.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ForegroundState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Public entry point. Never fails; errors become the report message.
    pub async fn enable(&self) -> AcquisitionReport {
        match self.subscribe().await {
            Ok(subscription) => AcquisitionReport {
                state: self.state(),
                message: "Notifications are on.".to_string(),
                endpoint: Some(subscription.endpoint().to_string()),
            },
            Err(err) => {
                if err.is_terminal_for_attempt() {
                    tracing::info!(
                        error = %err,
                        state = %self.state(),
                        "notifications need action outside the app"
                    );
                } else {
                    tracing::warn!(
                        error = %err,
                        state = %self.state(),
                        "enabling notifications failed"
                    );
                }
                AcquisitionReport {
                    state: self.state(),
                    message: err.user_message(),
                    endpoint: self.endpoint(),
                }
            }
        }
    }

    /// Acquire and persist a subscription.
    pub async fn subscribe(&self) -> Result<NormalizedSubscription> {
        let (user_id, key) = self.preflight()?;
        let needs_prompt = self.begin()?;
        match self.acquire(&user_id, &key, needs_prompt).await {
            Ok(subscription) => {
                let mut state = self.lock();
                state.lifecycle.transition(SubscriptionState::Active)?;
                state.endpoint = Some(subscription.endpoint().to_string());
                Ok(subscription)
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Checks that need no prompt and no state change.
    fn preflight(&self) -> Result<(String, ApplicationServerKey)> {
        let user_id = self
            .platform
            .user
            .current_user_id()
            .filter(|id| !id.is_empty())
            .ok_or(Error::NotSignedIn)?;
        if let Some(missing) = self.platform.capabilities.missing() {
            return Err(Error::UnsupportedPlatform(format!("{missing} is unavailable")));
        }
        if self.platform.info.requires_install_before_prompt() {
            return Err(Error::InstallRequired);
        }
        let key = ApplicationServerKey::from_base64url(&self.vapid_public_key)?;
        Ok((user_id, key))
    }

    /// Move into the flow. Returns whether the permission prompt is needed.
    fn begin(&self) -> Result<bool> {
        let permission = self.platform.permission.current();
        let mut state = self.lock();
        if state.lifecycle.state() == SubscriptionState::Denied {
            if permission == PermissionState::Denied {
                return Err(Error::PermissionDenied);
            }
            // Lifted in the OS settings since the last attempt.
            state.lifecycle.observe(SubscriptionState::Unregistered);
        }

        let current = state.lifecycle.state();
        if permission == PermissionState::Granted
            && current.can_transition_to(SubscriptionState::Subscribing)
        {
            state.lifecycle.transition(SubscriptionState::Subscribing)?;
            return Ok(false);
        }
        state.lifecycle.transition(SubscriptionState::PermissionPending)?;
        Ok(true)
    }

    async fn acquire(
        &self,
        user_id: &str,
        key: &ApplicationServerKey,
        needs_prompt: bool,
    ) -> Result<NormalizedSubscription> {
        if needs_prompt {
            match self.platform.permission.request().await? {
                PermissionState::Granted => {
                    self.lock()
                        .lifecycle
                        .transition(SubscriptionState::Subscribing)?;
                }
                // A dismissed prompt counts as a denial for this attempt.
                PermissionState::Denied | PermissionState::Default => {
                    return Err(Error::PermissionDenied);
                }
            }
        }

        let registration = self
            .platform
            .workers
            .registration()
            .await?
            .ok_or(Error::WorkerNotRegistered)?;
        let push = registration.push_manager();
        let live = match push.get_subscription().await? {
            Some(existing) => {
                tracing::debug!(user_id, "reusing live push subscription");
                existing
            }
            None => push.subscribe(key).await?,
        };
        let subscription = normalize_live(&live).ok_or_else(|| {
            Error::MalformedPayload("platform subscription is missing endpoint or keys".into())
        })?;

        let context = RecordContext {
            platform_flags: self.platform.info.flags(),
            user_agent: self.platform.user_agent.clone(),
        };
        self.gateway.upsert(user_id, &subscription, &context).await?;
        self.post_metadata(registration.as_ref(), user_id, key);
        Ok(subscription)
    }

    fn post_metadata(
        &self,
        registration: &dyn WorkerRegistration,
        user_id: &str,
        key: &ApplicationServerKey,
    ) {
        let message = WorkerMessage::StorePushMetadata(PushMetadata {
            user_id: user_id.to_string(),
            vapid_public_key: key.to_base64url(),
            platform_flags: self.platform.info.flags(),
        });
        if let Err(err) = registration.post_message(message) {
            // The subscription works; only background renewal is lost until
            // the next successful enable.
            tracing::warn!(user_id, error = %err, "could not hand renewal metadata to the worker");
        }
    }

    fn fail(&self, err: &Error) {
        let mut state = self.lock();
        let current = state.lifecycle.state();
        let target = match err {
            Error::PermissionDenied if current == SubscriptionState::PermissionPending => {
                SubscriptionState::Denied
            }
            _ => SubscriptionState::Error,
        };
        if current.can_transition_to(target) {
            let _ = state.lifecycle.transition(target);
        }
    }

    /// User opt-out: unsubscribe and delete the record for the live
    /// subscription and for the last known endpoint. Returns the endpoint
    /// that was removed, if any.
    ///
    /// A page that never ran `enable` (a reload, a second tab) still tears
    /// down whatever the platform holds; only the state transition is
    /// skipped.
    pub async fn disable(&self) -> Result<Option<String>> {
        let user_id = self
            .platform
            .user
            .current_user_id()
            .filter(|id| !id.is_empty())
            .ok_or(Error::NotSignedIn)?;
        let (remembered, tracked) = {
            let mut state = self.lock();
            let tracked = state
                .lifecycle
                .state()
                .can_transition_to(SubscriptionState::Unsubscribing);
            if tracked {
                state.lifecycle.transition(SubscriptionState::Unsubscribing)?;
            }
            (state.endpoint.clone(), tracked)
        };

        match self.teardown(&user_id, remembered).await {
            Ok(endpoint) => {
                let mut state = self.lock();
                if tracked {
                    state.lifecycle.transition(SubscriptionState::Unregistered)?;
                }
                state.endpoint = None;
                Ok(endpoint)
            }
            Err(err) => {
                if tracked {
                    self.fail(&err);
                }
                Err(err)
            }
        }
    }

    async fn teardown(&self, user_id: &str, remembered: Option<String>) -> Result<Option<String>> {
        let mut endpoint = remembered;
        if let Some(registration) = self.platform.workers.registration().await? {
            let push = registration.push_manager();
            if let Some(live) = push.get_subscription().await? {
                if endpoint.as_deref() != Some(live.endpoint.as_str()) {
                    if let Some(stale) = endpoint.replace(live.endpoint.clone()) {
                        self.gateway.delete(user_id, &stale).await?;
                    }
                }
                push.unsubscribe().await?;
            }
        }
        if let Some(endpoint) = &endpoint {
            self.gateway.delete(user_id, endpoint).await?;
        }
        Ok(endpoint)
    }

    /// Like [`AcquisitionFlow::disable`], reported the way `enable` is.
    pub async fn opt_out(&self) -> AcquisitionReport {
        match self.disable().await {
            Ok(_) => AcquisitionReport {
                state: self.state(),
                message: "Notifications are off.".to_string(),
                endpoint: None,
            },
            Err(err) => {
                tracing::warn!(error = %err, "disabling notifications failed");
                AcquisitionReport {
                    state: self.state(),
                    message: err.user_message(),
                    endpoint: self.endpoint(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{PlatformInfo, detect};
    use crate::platform_api::Capabilities;
    use crate::sim::{
        RecordingRegistration, SimPermission, SimPushManager, SimUser, SimWorkerRegistry,
    };
    use crate::store::MemoryStore;
    use crate::vapid::test_key;

    struct Harness {
        store: Arc<MemoryStore>,
        push: Arc<SimPushManager>,
        permission: Arc<SimPermission>,
        registration: Arc<RecordingRegistration>,
        flow: AcquisitionFlow,
    }

    fn harness_with(permission: SimPermission, info: PlatformInfo, registered: bool) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let push = Arc::new(SimPushManager::new());
        let permission = Arc::new(permission);
        let registration = Arc::new(RecordingRegistration::new(push.clone()));
        let workers = if registered {
            SimWorkerRegistry::with(registration.clone())
        } else {
            SimWorkerRegistry::empty()
        };
        let platform = ForegroundPlatform {
            info,
            capabilities: Capabilities::default(),
            user_agent: "test-agent".to_string(),
            permission: permission.clone(),
            workers: Arc::new(workers),
            user: Arc::new(SimUser::signed_in("u1")),
        };
        let gateway = PersistenceGateway::new(store.clone());
        let flow = AcquisitionFlow::new(platform, gateway, test_key());
        Harness {
            store,
            push,
            permission,
            registration,
            flow,
        }
    }

    fn harness() -> Harness {
        harness_with(SimPermission::granting(), PlatformInfo::default(), true)
    }

    impl Harness {
        /// A second page over the same store, permission and registration.
        fn page_with(&self, edit: impl FnOnce(&mut ForegroundPlatform)) -> AcquisitionFlow {
            let mut platform = ForegroundPlatform {
                info: PlatformInfo::default(),
                capabilities: Capabilities::default(),
                user_agent: "test-agent".to_string(),
                permission: self.permission.clone(),
                workers: Arc::new(SimWorkerRegistry::with(self.registration.clone())),
                user: Arc::new(SimUser::signed_in("u1")),
            };
            edit(&mut platform);
            let gateway = PersistenceGateway::new(self.store.clone());
            AcquisitionFlow::new(platform, gateway, test_key())
        }
    }

    const COLLECTION: &str = "users/u1/pushSubscriptions";

    // ========================================================================
    // Happy path
    // ========================================================================

    #[tokio::test]
    async fn enable_persists_then_posts_metadata() {
        let h = harness();
        let report = h.flow.enable().await;
        assert!(report.is_active(), "{report:?}");
        assert_eq!(report.endpoint.as_deref(), Some(h.push.endpoint(1).as_str()));
        assert_eq!(h.store.count(COLLECTION), 1);

        let posted = h.registration.posted();
        assert_eq!(posted.len(), 1);
        let WorkerMessage::StorePushMetadata(meta) = &posted[0];
        assert_eq!(meta.user_id, "u1");
        assert_eq!(meta.vapid_public_key, test_key());
        assert_eq!(
            h.flow.state_handle().lock().unwrap().lifecycle.history(),
            &[
                SubscriptionState::Unregistered,
                SubscriptionState::PermissionPending,
                SubscriptionState::Subscribing
            ]
        );
    }

    #[tokio::test]
    async fn repeated_enable_reuses_the_same_record() {
        let h = harness();
        let first = h.flow.enable().await;
        let second = h.flow.enable().await;
        let third = h.flow.enable().await;
        assert_eq!(first.endpoint, second.endpoint);
        assert_eq!(second.endpoint, third.endpoint);
        assert_eq!(h.store.count(COLLECTION), 1);
        assert_eq!(h.store.write_count(), 3);
        assert_eq!(h.push.subscribe_calls(), 1);
        // Permission was already granted after the first prompt.
        assert_eq!(h.permission.request_count(), 1);
    }

    // ========================================================================
    // Failure modes
    // ========================================================================

    #[tokio::test]
    async fn denied_permission_is_terminal_for_the_attempt() {
        let h = harness_with(SimPermission::denying(), PlatformInfo::default(), true);
        let report = h.flow.enable().await;
        assert_eq!(report.state, SubscriptionState::Denied);
        assert!(report.message.contains("blocked"));
        assert_eq!(h.store.count(COLLECTION), 0);

        let err = h.flow.subscribe().await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied));
        assert_eq!(h.permission.request_count(), 1);
    }

    #[tokio::test]
    async fn missing_registration_is_a_precondition_failure() {
        let h = harness_with(SimPermission::granting(), PlatformInfo::default(), false);
        let err = h.flow.subscribe().await.unwrap_err();
        assert!(matches!(err, Error::WorkerNotRegistered));
        assert_eq!(h.flow.state(), SubscriptionState::Error);
        assert!(err.remediation().is_some());
    }

    #[tokio::test]
    async fn ios_outside_home_screen_requires_install() {
        let ios = detect(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
            false,
        );
        let h = harness_with(SimPermission::granting(), ios, true);
        let err = h.flow.subscribe().await.unwrap_err();
        assert!(matches!(err, Error::InstallRequired));
        assert_eq!(h.permission.request_count(), 0);
        assert_eq!(h.flow.state(), SubscriptionState::Unregistered);
    }

    #[tokio::test]
    async fn partial_platform_subscription_is_never_persisted() {
        let h = harness();
        h.push.set_omit_p256dh(true);
        let err = h.flow.subscribe().await.unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));
        assert_eq!(h.store.write_count(), 0);
        assert!(h.registration.posted().is_empty());
    }

    #[tokio::test]
    async fn store_failure_is_surfaced_and_error_state_allows_retry() {
        let h = harness();
        h.store.set_fail_writes(true);
        let report = h.flow.enable().await;
        assert_eq!(report.state, SubscriptionState::Error);
        assert!(report.message.contains("connection"));

        h.store.set_fail_writes(false);
        let report = h.flow.enable().await;
        assert!(report.is_active());
    }

    #[tokio::test]
    async fn invalid_server_key_fails_before_prompting() {
        let mut h = harness();
        h.flow.vapid_public_key = "not-a-key".to_string();
        let err = h.flow.subscribe().await.unwrap_err();
        assert!(matches!(err, Error::InvalidServerKey(_)));
        assert_eq!(h.permission.request_count(), 0);
    }

    #[tokio::test]
    async fn missing_push_api_fails_before_prompting() {
        let h = harness();
        let page = h.page_with(|platform| {
            platform.capabilities = Capabilities {
                push: false,
                ..Capabilities::default()
            };
        });
        let err = page.subscribe().await.unwrap_err();
        assert!(matches!(&err, Error::UnsupportedPlatform(msg) if msg.contains("Push API")));
        assert_eq!(page.state(), SubscriptionState::Unregistered);
        assert_eq!(h.permission.request_count(), 0);
        assert_eq!(h.push.subscribe_calls(), 0);
        assert_eq!(h.store.write_count(), 0);

        let report = page.enable().await;
        assert!(!report.is_active());
        assert_eq!(report.message, err.user_message());
    }

    #[tokio::test]
    async fn signed_out_user_is_never_prompted() {
        let h = harness();
        let page = h.page_with(|platform| platform.user = Arc::new(SimUser(None)));
        let err = page.subscribe().await.unwrap_err();
        assert!(matches!(err, Error::NotSignedIn));
        assert_eq!(page.state(), SubscriptionState::Unregistered);
        assert_eq!(h.permission.request_count(), 0);
        assert_eq!(h.push.subscribe_calls(), 0);
        assert_eq!(h.store.write_count(), 0);
        assert!(h.registration.posted().is_empty());

        let signed_in_blank = h.page_with(|platform| {
            platform.user = Arc::new(SimUser(Some(String::new())));
        });
        assert!(matches!(
            signed_in_blank.subscribe().await.unwrap_err(),
            Error::NotSignedIn
        ));
    }

    #[tokio::test]
    async fn reset_permission_prompts_again_from_active() {
        let h = harness();
        assert!(h.flow.enable().await.is_active());

        h.permission
            .reset(PermissionState::Default, PermissionState::Granted);
        let report = h.flow.enable().await;
        assert!(report.is_active(), "{report:?}");
        assert_eq!(h.permission.request_count(), 2);
        assert_eq!(h.store.count(COLLECTION), 1);
    }

    #[tokio::test]
    async fn revoked_permission_on_active_page_reports_denial() {
        let h = harness();
        assert!(h.flow.enable().await.is_active());

        h.permission
            .reset(PermissionState::Denied, PermissionState::Denied);
        let report = h.flow.enable().await;
        assert_eq!(report.state, SubscriptionState::Denied);
        assert_eq!(report.message, Error::PermissionDenied.user_message());
        assert_eq!(h.permission.request_count(), 2);
    }

    // ========================================================================
    // Opt-out
    // ========================================================================

    #[tokio::test]
    async fn disable_unsubscribes_and_deletes() {
        let h = harness();
        h.flow.enable().await;
        let removed = h.flow.disable().await.unwrap();
        assert_eq!(removed, Some(h.push.endpoint(1)));
        assert_eq!(h.store.count(COLLECTION), 0);
        assert!(h.push.current().is_none());
        assert_eq!(h.flow.state(), SubscriptionState::Unregistered);
        assert_eq!(h.flow.endpoint(), None);

        let report = h.flow.opt_out().await;
        assert_eq!(report.state, SubscriptionState::Unregistered);
    }

    #[tokio::test]
    async fn opt_out_from_a_fresh_page_removes_the_live_record() {
        let h = harness();
        assert!(h.flow.enable().await.is_active());

        let reloaded = h.page_with(|_| {});
        assert_eq!(reloaded.state(), SubscriptionState::Unregistered);
        let report = reloaded.opt_out().await;
        assert_eq!(report.state, SubscriptionState::Unregistered);
        assert_eq!(report.message, "Notifications are off.");
        assert_eq!(h.store.count(COLLECTION), 0);
        assert!(h.push.current().is_none());
    }

    #[tokio::test]
    async fn opt_out_with_nothing_live_is_a_no_op() {
        let h = harness();
        assert_eq!(h.flow.disable().await.unwrap(), None);
        assert_eq!(h.flow.state(), SubscriptionState::Unregistered);
        assert_eq!(h.store.delete_count(), 0);
    }
}
