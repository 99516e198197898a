//! Inbound push delivery and notification clicks.
//!
//! Payload parsing never fails: anything that is not a usable JSON object
//! falls back to the configured title and body, so a push always shows
//! something.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clients::{ClientId, ClientRegistry};
use crate::error::Result;
use crate::messages::ClientMessage;
use crate::platform::PlatformInfo;
use crate::platform_api::{NotificationId, NotificationSurface};

/// Fallback notification content, from the `[notifications]` config section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub default_title: String,
    pub default_body: String,
    /// Where a click goes when the payload names no URL.
    pub default_url: String,
    pub icon: Option<String>,
    pub badge: Option<String>,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            default_title: "Budget update".to_string(),
            default_body: "You have a new notification.".to_string(),
            default_url: "/".to_string(),
            icon: Some("/icons/icon-192.png".to_string()),
            badge: Some("/icons/badge-72.png".to_string()),
        }
    }
}

/// Parsed push payload. Every field is already defaulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushContent {
    pub title: String,
    pub body: String,
    pub url: String,
    pub icon: Option<String>,
    pub tag: Option<String>,
    pub require_interaction: bool,
}

impl PushContent {
    /// Parse raw push data. `None` is a push without a payload.
    #[must_use]
    pub fn parse(data: Option<&[u8]>, defaults: &NotificationDefaults) -> Self {
        let mut content = Self {
            title: defaults.default_title.clone(),
            body: defaults.default_body.clone(),
            url: defaults.default_url.clone(),
            icon: defaults.icon.clone(),
            tag: None,
            require_interaction: false,
        };
        let Some(data) = data else {
            return content;
        };

        match serde_json::from_slice::<Value>(data) {
            Ok(Value::Object(obj)) => {
                if let Some(title) = text_field(&obj, "title") {
                    content.title = title;
                }
                if let Some(body) = text_field(&obj, "body") {
                    content.body = body;
                }
                let data_url = obj
                    .get("data")
                    .and_then(Value::as_object)
                    .and_then(|data| text_field(data, "url"));
                if let Some(url) = text_field(&obj, "url").or(data_url) {
                    content.url = url;
                }
                if let Some(icon) = text_field(&obj, "icon") {
                    content.icon = Some(icon);
                }
                content.tag = text_field(&obj, "tag");
                content.require_interaction = obj
                    .get("requireInteraction")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
            }
            Ok(Value::String(text)) if !text.trim().is_empty() => {
                content.body = text.trim().to_string();
            }
            Ok(_) => {
                tracing::debug!("push payload is JSON but not an object; using defaults");
            }
            Err(_) => match std::str::from_utf8(data) {
                Ok(text) if !text.trim().is_empty() => content.body = text.trim().to_string(),
                _ => tracing::debug!("push payload is not text; using defaults"),
            },
        }
        content
    }
}

fn text_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Data attached to a notification and handed back on click.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    pub url: String,
}

/// Options passed to the notification surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOptions {
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub data: NotificationData,
    /// Omitted entirely where the platform does not support it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_interaction: Option<bool>,
}

/// A notification ready to show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub title: String,
    pub options: NotificationOptions,
}

impl NotificationRequest {
    #[must_use]
    pub fn render(
        content: PushContent,
        defaults: &NotificationDefaults,
        info: &PlatformInfo,
    ) -> Self {
        let require_interaction = info
            .supports_require_interaction()
            .then_some(content.require_interaction);
        Self {
            title: content.title,
            options: NotificationOptions {
                body: content.body,
                icon: content.icon,
                badge: defaults.badge.clone(),
                tag: content.tag,
                data: NotificationData { url: content.url },
                require_interaction,
            },
        }
    }
}

/// What a click did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    /// An existing window was focused and told to navigate.
    Focused(ClientId),
    /// No window was open; a new one was opened at the URL.
    Opened(ClientId),
}

/// Worker-side push and click handling.
#[derive(Clone)]
pub struct DeliveryHandler {
    surface: Arc<dyn NotificationSurface>,
    clients: Arc<ClientRegistry>,
    info: PlatformInfo,
    defaults: NotificationDefaults,
}

impl std::fmt::Debug for DeliveryHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryHandler")
            .field("info", &self.info)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl DeliveryHandler {
    #[must_use]
    pub fn new(
        surface: Arc<dyn NotificationSurface>,
        clients: Arc<ClientRegistry>,
        info: PlatformInfo,
        defaults: NotificationDefaults,
    ) -> Self {
        Self {
            surface,
            clients,
            info,
            defaults,
        }
    }

    /// Show a notification for an inbound push.
    pub async fn handle_push(&self, data: Option<&[u8]>) -> Result<NotificationId> {
        let content = PushContent::parse(data, &self.defaults);
        let request = NotificationRequest::render(content, &self.defaults, &self.info);
        let id = self.surface.show(&request).await?;
        tracing::info!(notification_id = id.0, tag = ?request.options.tag, "notification shown");
        Ok(id)
    }

    /// Close the clicked notification, then focus a window or open one.
    pub async fn handle_click(
        &self,
        id: NotificationId,
        url: Option<&str>,
    ) -> Result<ClickOutcome> {
        self.surface.close(id).await?;
        let url = url
            .filter(|u| !u.is_empty())
            .unwrap_or(&self.defaults.default_url)
            .to_string();

        if let Some(window) = self.clients.windows().into_iter().next() {
            self.clients.focus(window.id);
            if self.clients.post(
                window.id,
                ClientMessage::NotificationClicked { url: url.clone() },
            ) {
                tracing::debug!(
                    client_id = %window.id,
                    url = %url,
                    "focused window for notification click"
                );
                return Ok(ClickOutcome::Focused(window.id));
            }
            tracing::debug!(client_id = %window.id, "focused window went away; opening a new one");
        }
        Ok(ClickOutcome::Opened(self.clients.open_window(&url)))
    }
}
