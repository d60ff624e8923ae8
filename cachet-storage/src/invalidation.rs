//! Cluster invalidation: wire format, outbound publishing and the inbound
//! handler.
//!
//! Inbound messages are terminal. Applying one never publishes a message of
//! its own and never raises listener events; otherwise two nodes would keep
//! invalidating each other forever.

use crate::manager::CacheManager;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use cachet_core::{
    CacheEntryKey, CacheKey, CachetError, CachetResult, IdentifierValue, InvalidationError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Cluster-wide notice that an entry or a timestamp region is stale.
///
/// Timestamp messages carry the two `update_timestamps_*` fields; key
/// messages carry the rest. `id_b64` is the base64 of the JSON-encoded
/// disassembled identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationMessage {
    pub cache_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_b64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_or_role_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_hash_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_timestamps_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_timestamps_value: Option<i64>,
}

/// What an inbound message asks a cache to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationTarget {
    /// Drop one entry.
    Key(CacheEntryKey),
    /// Record a new update timestamp for a region.
    Timestamp { region: String, timestamp: i64 },
}

impl InvalidationMessage {
    /// Message invalidating one composite key.
    pub fn for_key(cache_name: &str, key: &CacheKey) -> Result<Self, InvalidationError> {
        let encoded = serde_json::to_vec(key.id()).map_err(|e| InvalidationError::Encode {
            reason: e.to_string(),
        })?;
        Ok(Self {
            cache_name: cache_name.to_string(),
            id_b64: Some(BASE64.encode(encoded)),
            entity_or_role_name: Some(key.owner_name().to_string()),
            tenant_identifier: key.tenant_id().map(str::to_string),
            entity_hash_code: Some(key.precomputed_hash()),
            update_timestamps_key: None,
            update_timestamps_value: None,
        })
    }

    /// Message carrying a region's new update timestamp.
    pub fn for_timestamp(cache_name: &str, region: impl Into<String>, timestamp: i64) -> Self {
        Self {
            cache_name: cache_name.to_string(),
            id_b64: None,
            entity_or_role_name: None,
            tenant_identifier: None,
            entity_hash_code: None,
            update_timestamps_key: Some(region.into()),
            update_timestamps_value: Some(timestamp),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, InvalidationError> {
        serde_json::from_str(json).map_err(|e| InvalidationError::Decode {
            reason: e.to_string(),
        })
    }

    pub fn to_json(&self) -> Result<String, InvalidationError> {
        serde_json::to_string(self).map_err(|e| InvalidationError::Encode {
            reason: e.to_string(),
        })
    }

    pub fn is_timestamp(&self) -> bool {
        self.update_timestamps_key.is_some()
    }

    /// Decode the action this message describes.
    pub fn target(&self) -> Result<InvalidationTarget, InvalidationError> {
        if let Some(region) = &self.update_timestamps_key {
            let timestamp = self.update_timestamps_value.ok_or_else(|| missing("updateTimestampsValue"))?;
            return Ok(InvalidationTarget::Timestamp {
                region: region.clone(),
                timestamp,
            });
        }

        let id_b64 = self.id_b64.as_deref().ok_or_else(|| missing("idB64"))?;
        let owner_name = self
            .entity_or_role_name
            .as_deref()
            .ok_or_else(|| missing("entityOrRoleName"))?;
        let hash = self.entity_hash_code.ok_or_else(|| missing("entityHashCode"))?;

        let bytes = BASE64.decode(id_b64).map_err(|e| InvalidationError::Decode {
            reason: format!("idB64 is not valid base64: {}", e),
        })?;
        let id: IdentifierValue = serde_json::from_slice(&bytes).map_err(|e| InvalidationError::Decode {
            reason: format!("idB64 does not hold an identifier: {}", e),
        })?;

        Ok(InvalidationTarget::Key(CacheEntryKey::Composite(CacheKey::from_parts(
            id,
            owner_name,
            self.tenant_identifier.clone(),
            hash,
        ))))
    }
}

fn missing(field: &str) -> InvalidationError {
    InvalidationError::Decode {
        reason: format!("missing field {}", field),
    }
}

/// Outbound channel to the rest of the cluster.
pub trait InvalidationPublisher: Send + Sync {
    fn publish(&self, message: &InvalidationMessage) -> CachetResult<()>;
}

impl<F> InvalidationPublisher for F
where
    F: Fn(&InvalidationMessage) -> CachetResult<()> + Send + Sync,
{
    fn publish(&self, message: &InvalidationMessage) -> CachetResult<()> {
        self(message)
    }
}

/// Applies inbound messages to the caches of one manager.
#[derive(Debug, Clone)]
pub struct InvalidationReceiver {
    manager: Arc<CacheManager>,
}

impl InvalidationReceiver {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    /// Apply one message. Returns `false` when no cache of that name exists.
    pub fn apply(&self, message: &InvalidationMessage) -> CachetResult<bool> {
        let Some(cache) = self.manager.get_cache(&message.cache_name)? else {
            info!(
                location = %self.manager.location(),
                cache = %message.cache_name,
                "Can't invalidate, no cache with that name"
            );
            return Ok(false);
        };

        match message.target()? {
            InvalidationTarget::Key(key) => {
                let removed = cache.receive_invalidate(&key)?;
                debug!(cache = %message.cache_name, key = %key, removed, "Applied key invalidation");
            }
            InvalidationTarget::Timestamp { region, timestamp } => {
                cache.receive_timestamp_invalidate(&region, timestamp)?;
                debug!(cache = %message.cache_name, region = %region, timestamp, "Applied timestamp invalidation");
            }
        }
        Ok(true)
    }

    /// Decode and apply a JSON message.
    pub fn apply_json(&self, json: &str) -> CachetResult<bool> {
        let message = InvalidationMessage::from_json(json).map_err(CachetError::from)?;
        self.apply(&message)
    }
}
