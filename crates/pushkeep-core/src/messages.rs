//! Cross-context message types.
//!
//! One tagged enum per direction so each side matches exhaustively:
//!
//! - [`WorkerMessage`]: foreground → worker (directed `postMessage`).
//! - [`ClientMessage`]: worker → foreground (broadcast to every client, or
//!   posted to the one being focused).

use serde::{Deserialize, Serialize};

use crate::metadata::PushMetadata;

/// Foreground → worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// Cache what the worker needs to renew on its own.
    StorePushMetadata(PushMetadata),
}

/// Worker → foreground.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Outcome of a platform-triggered renewal.
    PushSubscriptionChange { payload: SubscriptionChange },
    /// A notification was clicked; the receiving page should navigate.
    NotificationClicked { url: String },
}

/// Renewal outcome carried by [`ClientMessage::PushSubscriptionChange`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionChange {
    #[serde(rename_all = "camelCase")]
    SubscriptionRenewed {
        endpoint: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_endpoint: Option<String>,
        /// False when the superseded record could not be removed.
        #[serde(default = "default_true")]
        old_removed: bool,
    },
    SubscriptionError { error: String },
}

fn default_true() -> bool {
    true
}

impl ClientMessage {
    #[must_use]
    pub fn renewed(endpoint: &str, old_endpoint: Option<&str>, old_removed: bool) -> Self {
        Self::PushSubscriptionChange {
            payload: SubscriptionChange::SubscriptionRenewed {
                endpoint: endpoint.to_string(),
                old_endpoint: old_endpoint.map(str::to_string),
                old_removed,
            },
        }
    }

    #[must_use]
    pub fn renewal_failed(error: impl Into<String>) -> Self {
        Self::PushSubscriptionChange {
            payload: SubscriptionChange::SubscriptionError {
                error: error.into(),
            },
        }
    }
}
