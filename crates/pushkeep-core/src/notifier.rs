//! Foreground side of worker broadcasts.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::acquisition::SharedForegroundState;
use crate::messages::{ClientMessage, SubscriptionChange};
use crate::platform_api::Navigator;
use crate::state::SubscriptionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Failure,
}

/// One-line notice for the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

pub struct ForegroundNotifier {
    state: SharedForegroundState,
    navigator: Arc<dyn Navigator>,
}

impl std::fmt::Debug for ForegroundNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForegroundNotifier").finish_non_exhaustive()
    }
}

impl ForegroundNotifier {
    #[must_use]
    pub fn new(state: SharedForegroundState, navigator: Arc<dyn Navigator>) -> Self {
        Self { state, navigator }
    }

    /// Apply one broadcast. Returns the notice to surface, if any.
    pub fn handle(&self, message: &ClientMessage) -> Option<Notice> {
        match message {
            ClientMessage::PushSubscriptionChange { payload } => Some(self.apply_change(payload)),
            ClientMessage::NotificationClicked { url } => {
                tracing::debug!(url = %url, "navigating for notification click");
                self.navigator.navigate(url);
                None
            }
        }
    }

    fn apply_change(&self, change: &SubscriptionChange) -> Notice {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match change {
            SubscriptionChange::SubscriptionRenewed {
                endpoint,
                old_removed,
                ..
            } => {
                state.lifecycle.observe(SubscriptionState::Active);
                state.endpoint = Some(endpoint.clone());
                if !old_removed {
                    tracing::warn!("renewal left the superseded subscription record in place");
                }
                Notice {
                    level: NoticeLevel::Success,
                    text: "Notifications were refreshed for this device.".to_string(),
                }
            }
            SubscriptionChange::SubscriptionError { error } => {
                tracing::warn!(error = %error, "background renewal failed");
                state.lifecycle.observe(SubscriptionState::Error);
                Notice {
                    level: NoticeLevel::Failure,
                    text: "Notifications stopped working on this device. \
                           Turn them on again to fix it."
                        .to_string(),
                }
            }
        }
    }

    /// Consume an inbox until the worker side goes away.
    pub async fn run(
        &self,
        inbox: &mut mpsc::UnboundedReceiver<ClientMessage>,
        mut on_notice: impl FnMut(Notice) + Send,
    ) {
        while let Some(message) = inbox.recv().await {
            if let Some(notice) = self.handle(&message) {
                on_notice(notice);
            }
        }
    }
}
