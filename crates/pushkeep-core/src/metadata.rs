//! Renewal metadata: the single cached slot the renewal handler reads.
//!
//! The foreground writes it (through `STORE_PUSH_METADATA`) whenever a
//! subscription is created or renewed; the renewal handler is the only
//! reader. Each write replaces the previous value.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::platform::PlatformFlags;
use crate::worker_storage::WorkerStorage;

/// Default storage key for the cached slot.
pub const DEFAULT_METADATA_KEY: &str = "push-metadata";

/// Payload of `STORE_PUSH_METADATA`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMetadata {
    pub user_id: String,
    pub vapid_public_key: String,
    #[serde(default)]
    pub platform_flags: PlatformFlags,
}

/// Cached metadata, stamped when the worker stored it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalMetadata {
    pub user_id: String,
    pub vapid_public_key: String,
    #[serde(default)]
    pub platform_flags: PlatformFlags,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl RenewalMetadata {
    #[must_use]
    pub fn stamped(metadata: PushMetadata) -> Self {
        Self {
            user_id: metadata.user_id,
            vapid_public_key: metadata.vapid_public_key,
            platform_flags: metadata.platform_flags,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Single-slot cache over worker storage.
#[derive(Clone)]
pub struct RenewalMetadataCache {
    storage: Arc<dyn WorkerStorage>,
    key: String,
}

impl std::fmt::Debug for RenewalMetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalMetadataCache")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl RenewalMetadataCache {
    #[must_use]
    pub fn new(storage: Arc<dyn WorkerStorage>) -> Self {
        Self::with_key(storage, DEFAULT_METADATA_KEY)
    }

    #[must_use]
    pub fn with_key(storage: Arc<dyn WorkerStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    /// Replace the cached slot.
    pub async fn store(&self, metadata: &RenewalMetadata) -> Result<(), StoreError> {
        let value = serde_json::to_value(metadata)
            .map_err(|e| StoreError::Corrupt(format!("renewal metadata: {e}")))?;
        self.storage.put(&self.key, value).await?;
        tracing::debug!(user_id = %metadata.user_id, "renewal metadata cached");
        Ok(())
    }

    /// Latest cached value, if any.
    ///
    /// An entry that no longer deserializes is reported as corrupt and
    /// dropped, so the next enable can write a fresh one.
    pub async fn load(&self) -> Result<Option<RenewalMetadata>, StoreError> {
        let Some(value) = self.storage.get(&self.key).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) => {
                if let Err(remove_err) = self.storage.remove(&self.key).await {
                    tracing::warn!(
                        key = %self.key,
                        error = %remove_err,
                        "could not drop corrupt renewal metadata"
                    );
                }
                Err(StoreError::Corrupt(format!("renewal metadata: {e}")))
            }
        }
    }
}
