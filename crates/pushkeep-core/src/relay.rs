//! HTTP relay for renewal writes.
//!
//! In some deployments the worker cannot talk to the store directly. It
//! POSTs `{userId, subscription, oldEndpoint?}` to a relay endpoint instead;
//! any non-2xx answer is a persistence failure. [`RelayReceiver`] is the
//! server-side half that applies such a request through the gateway.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, RelayError, Result};
use crate::gateway::{
    PersistFuture, PersistenceGateway, RecordContext, ReplaceOutcome, SubscriptionPersister,
};
use crate::platform::PlatformFlags;
use crate::subscription::{NormalizedSubscription, normalize};

/// Body of the relay POST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub user_id: String,
    /// Serialized subscription (validated by the receiver, not trusted).
    pub subscription: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_endpoint: Option<String>,
    #[serde(default)]
    pub platform_flags: PlatformFlags,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_agent: String,
}

impl RelayRequest {
    #[must_use]
    pub fn new(
        user_id: &str,
        subscription: &NormalizedSubscription,
        context: &RecordContext,
        old_endpoint: Option<&str>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            subscription: subscription.to_json(),
            old_endpoint: old_endpoint.map(str::to_string),
            platform_flags: context.platform_flags,
            user_agent: context.user_agent.clone(),
        }
    }
}

/// Answer body sent by [`RelayReceiver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayResponse {
    pub old_removed: bool,
}

/// Relay client used by the worker.
#[derive(Debug, Clone)]
pub struct RelayClient {
    url: url::Url,
    client: reqwest::Client,
}

impl RelayClient {
    /// Build a client with a request timeout. The timeout bounds the HTTP
    /// exchange only; failed requests are not retried.
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = url::Url::parse(url)
            .map_err(|e| RelayError::InvalidRequest(format!("relay url {url}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(RelayError::from)?;
        Ok(Self { url, client })
    }

    #[must_use]
    pub fn url(&self) -> &url::Url {
        &self.url
    }

    /// POST a request and map the answer.
    pub async fn submit(&self, request: &RelayRequest) -> Result<ReplaceOutcome> {
        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .json(request)
            .send()
            .await
            .map_err(RelayError::from)?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                url = %self.url,
                status = status.as_u16(),
                "relay rejected subscription write"
            );
            return Err(RelayError::Status {
                status: status.as_u16(),
            }
            .into());
        }

        // Older relays answer with an empty body; assume the delete went through.
        let body = response.bytes().await.map_err(RelayError::from)?;
        let old_removed = serde_json::from_slice::<RelayResponse>(&body)
            .map(|r| r.old_removed)
            .unwrap_or(true);
        tracing::info!(
            url = %self.url,
            status = status.as_u16(),
            "relay accepted subscription write"
        );
        Ok(ReplaceOutcome { old_removed })
    }
}

impl SubscriptionPersister for RelayClient {
    fn replace<'a>(
        &'a self,
        user_id: &'a str,
        subscription: &'a NormalizedSubscription,
        context: &'a RecordContext,
        old_endpoint: Option<&'a str>,
    ) -> PersistFuture<'a, ReplaceOutcome> {
        Box::pin(async move {
            let request = RelayRequest::new(user_id, subscription, context, old_endpoint);
            self.submit(&request).await
        })
    }
}

/// Server-side application of relay requests.
#[derive(Debug, Clone)]
pub struct RelayReceiver {
    gateway: PersistenceGateway,
}

impl RelayReceiver {
    #[must_use]
    pub fn new(gateway: PersistenceGateway) -> Self {
        Self { gateway }
    }

    /// Validate and apply a request.
    pub async fn apply(&self, request: &RelayRequest) -> Result<RelayResponse> {
        if request.user_id.is_empty() {
            return Err(RelayError::InvalidRequest("userId is empty".to_string()).into());
        }
        let subscription = normalize(&request.subscription).ok_or_else(|| {
            Error::MalformedPayload("subscription needs endpoint, keys.auth and keys.p256dh".into())
        })?;
        let context = RecordContext {
            platform_flags: request.platform_flags,
            user_agent: request.user_agent.clone(),
        };
        let outcome = self
            .gateway
            .replace(
                &request.user_id,
                &subscription,
                &context,
                request.old_endpoint.as_deref(),
            )
            .await?;
        Ok(RelayResponse {
            old_removed: outcome.old_removed,
        })
    }

    /// Apply a raw JSON body and return the HTTP status and body to answer with.
    pub async fn handle_body(&self, body: &[u8]) -> (u16, Value) {
        let request: RelayRequest = match serde_json::from_slice(body) {
            Ok(request) => request,
            Err(err) => {
                return (400, serde_json::json!({ "error": err.to_string() }));
            }
        };
        match self.apply(&request).await {
            Ok(response) => (200, serde_json::json!(response)),
            Err(
                err @ (Error::MalformedPayload(_) | Error::Relay(RelayError::InvalidRequest(_))),
            ) => (400, serde_json::json!({ "error": err.to_string() })),
            Err(err) => {
                tracing::error!(error = %err, "relay write failed");
                (502, serde_json::json!({ "error": err.to_string() }))
            }
        }
    }
}
