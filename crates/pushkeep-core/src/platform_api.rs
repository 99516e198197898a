//! Platform collaborator seams.
//!
//! Everything the lifecycle needs from the host (permission prompt, push
//! manager, worker registration, notification surface, signed-in user, page
//! navigation) is reached through these traits. A browser binding, a native
//! shell, or [`crate::sim`] can sit behind them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::delivery::NotificationRequest;
use crate::error::Result;
use crate::messages::WorkerMessage;
use crate::platform::PlatformInfo;
use crate::subscription::PlatformSubscription;
use crate::vapid::ApplicationServerKey;

/// Future returned by platform operations.
pub type PlatformFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Notification permission as reported by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Granted,
    Denied,
    /// Not decided yet. A dismissed prompt also resolves here.
    #[default]
    Default,
}

/// Host facilities present at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub notifications: bool,
    pub push: bool,
    pub background_worker: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            notifications: true,
            push: true,
            background_worker: true,
        }
    }
}

impl Capabilities {
    /// Name of the first missing facility, if any.
    #[must_use]
    pub fn missing(&self) -> Option<&'static str> {
        if !self.background_worker {
            Some("background worker")
        } else if !self.push {
            Some("Push API")
        } else if !self.notifications {
            Some("Notification API")
        } else {
            None
        }
    }
}

pub trait PermissionApi: Send + Sync {
    /// Current permission without prompting.
    fn current(&self) -> PermissionState;

    /// Show the prompt. There is no programmatic cancel.
    fn request(&self) -> PlatformFuture<'_, PermissionState>;
}

/// Per-registration push manager.
pub trait PushManager: Send + Sync {
    /// Live subscription for this registration, if any.
    fn get_subscription(&self) -> PlatformFuture<'_, Option<PlatformSubscription>>;

    /// Create (or return the existing) subscription for `key`.
    fn subscribe<'a>(
        &'a self,
        key: &'a ApplicationServerKey,
    ) -> PlatformFuture<'a, PlatformSubscription>;

    /// Drop the live subscription. Returns false when there was none.
    fn unsubscribe(&self) -> PlatformFuture<'_, bool>;
}

/// An active background worker registration as seen from a page.
pub trait WorkerRegistration: Send + Sync {
    fn push_manager(&self) -> Arc<dyn PushManager>;

    /// Directed message to the active worker.
    fn post_message(&self, message: WorkerMessage) -> Result<()>;
}

pub trait WorkerRegistry: Send + Sync {
    /// The active registration, or `None` when nothing is registered.
    fn registration(&self) -> PlatformFuture<'_, Option<Arc<dyn WorkerRegistration>>>;
}

/// Host notification surface.
pub trait NotificationSurface: Send + Sync {
    fn show<'a>(&'a self, request: &'a NotificationRequest) -> PlatformFuture<'a, NotificationId>;

    fn close(&self, id: NotificationId) -> PlatformFuture<'_, ()>;
}

/// Handle to a shown notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NotificationId(pub u64);

/// Authenticated-user provider.
pub trait UserProvider: Send + Sync {
    fn current_user_id(&self) -> Option<String>;
}

/// In-page navigation.
pub trait Navigator: Send + Sync {
    fn navigate(&self, url: &str);
}

/// Everything the foreground acquisition flow reaches through.
#[derive(Clone)]
pub struct ForegroundPlatform {
    pub info: PlatformInfo,
    pub capabilities: Capabilities,
    pub user_agent: String,
    pub permission: Arc<dyn PermissionApi>,
    pub workers: Arc<dyn WorkerRegistry>,
    pub user: Arc<dyn UserProvider>,
}

impl std::fmt::Debug for ForegroundPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForegroundPlatform")
            .field("info", &self.info)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_capability_is_named() {
        assert_eq!(Capabilities::default().missing(), None);
        let caps = Capabilities {
            push: false,
            ..Capabilities::default()
        };
        assert_eq!(caps.missing(), Some("Push API"));
    }

    #[test]
    fn permission_state_wire_names() {
        assert_eq!(
            serde_json::to_string(&PermissionState::Granted).unwrap(),
            "\"granted\""
        );
        assert_eq!(PermissionState::default(), PermissionState::Default);
    }
}
