//! Configuration types

use crate::error::{CachetResult, ConfigError};
use crate::identity::{CacheLocation, TypeDescriptor, DEFAULT_LOCATION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Free-form properties handed to a cache manager.
pub type Properties = BTreeMap<String, String>;

/// Expiry policy applied to entries of one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpiryPolicy {
    /// Entries never expire
    #[default]
    Eternal,
    /// Entries expire a fixed time after they were written
    AfterCreation(Duration),
    /// Entries expire a fixed time after they were last read or written
    AfterAccess(Duration),
}

impl ExpiryPolicy {
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            ExpiryPolicy::Eternal => None,
            ExpiryPolicy::AfterCreation(ttl) | ExpiryPolicy::AfterAccess(ttl) => Some(*ttl),
        }
    }

    /// Whether a read pushes the deadline back.
    pub fn refreshes_on_access(&self) -> bool {
        matches!(self, ExpiryPolicy::AfterAccess(_))
    }
}

/// Configuration of a single named cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfiguration {
    pub key_type: Option<TypeDescriptor>,
    pub value_type: Option<TypeDescriptor>,
    pub expiry: ExpiryPolicy,
    pub statistics_enabled: bool,
    pub management_enabled: bool,
    pub read_through: bool,
    pub write_through: bool,
    pub store_by_value: bool,
}

impl Default for CacheConfiguration {
    fn default() -> Self {
        Self {
            key_type: None,
            value_type: None,
            expiry: ExpiryPolicy::Eternal,
            statistics_enabled: false,
            management_enabled: false,
            read_through: false,
            write_through: false,
            // Values are held by reference
            store_by_value: false,
        }
    }
}

impl CacheConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the key and value types; `get_typed_cache` checks against them.
    pub fn typed<K: 'static, V: 'static>(mut self) -> Self {
        self.key_type = Some(TypeDescriptor::of::<K>());
        self.value_type = Some(TypeDescriptor::of::<V>());
        self
    }

    pub fn with_expiry(mut self, expiry: ExpiryPolicy) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn with_statistics(mut self, enabled: bool) -> Self {
        self.statistics_enabled = enabled;
        self
    }

    pub fn with_management(mut self, enabled: bool) -> Self {
        self.management_enabled = enabled;
        self
    }

    pub fn with_read_through(mut self, enabled: bool) -> Self {
        self.read_through = enabled;
        self
    }

    pub fn with_write_through(mut self, enabled: bool) -> Self {
        self.write_through = enabled;
        self
    }

    pub fn with_store_by_value(mut self, enabled: bool) -> Self {
        self.store_by_value = enabled;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - expiry durations are non-zero
    pub fn validate(&self) -> CachetResult<()> {
        if let Some(ttl) = self.expiry.ttl() {
            if ttl.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: "expiry".to_string(),
                    value: format!("{:?}", self.expiry),
                    reason: "expiry duration must be positive".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Read-only view exposed to management sinks.
    pub fn snapshot(&self) -> ConfigurationSnapshot {
        ConfigurationSnapshot {
            key_type_name: self.key_type.map(|t| t.name().to_string()),
            value_type_name: self.value_type.map(|t| t.name().to_string()),
            read_through: self.read_through,
            write_through: self.write_through,
            store_by_value: self.store_by_value,
            statistics_enabled: self.statistics_enabled,
            management_enabled: self.management_enabled,
        }
    }
}

/// Serializable snapshot of a cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationSnapshot {
    pub key_type_name: Option<String>,
    pub value_type_name: Option<String>,
    pub read_through: bool,
    pub write_through: bool,
    pub store_by_value: bool,
    pub statistics_enabled: bool,
    pub management_enabled: bool,
}

// ============================================================================
// PROVIDER CONFIGURATION
// ============================================================================

/// Provider-wide defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Location used when a caller passes none.
    pub default_location: CacheLocation,
    /// Properties used when a caller passes none.
    pub default_properties: Properties,
    /// Statistics toggle forced onto every new cache when set.
    pub statistics_enabled: bool,
    /// Management toggle forced onto every new cache when set.
    pub management_enabled: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default_location: CacheLocation::new(DEFAULT_LOCATION),
            default_properties: Properties::new(),
            statistics_enabled: false,
            management_enabled: false,
        }
    }
}

impl ProviderConfig {
    /// Create ProviderConfig from environment variables.
    ///
    /// Environment variables:
    /// - `CACHET_DEFAULT_LOCATION`: Location for managers requested without one (default: "cachet")
    /// - `CACHET_STATISTICS_ENABLED`: "true" or "1" to enable statistics on every cache (default: false)
    /// - `CACHET_MANAGEMENT_ENABLED`: "true" or "1" to enable management on every cache (default: false)
    pub fn from_env() -> Self {
        let default_location = std::env::var("CACHET_DEFAULT_LOCATION")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(CacheLocation::new)
            .unwrap_or_default();

        let statistics_enabled = std::env::var("CACHET_STATISTICS_ENABLED")
            .map(|s| parse_flag(&s))
            .unwrap_or(false);

        let management_enabled = std::env::var("CACHET_MANAGEMENT_ENABLED")
            .map(|s| parse_flag(&s))
            .unwrap_or(false);

        Self {
            default_location,
            default_properties: Properties::new(),
            statistics_enabled,
            management_enabled,
        }
    }

    /// Apply provider-wide toggles to a cache configuration.
    pub fn apply_to(&self, mut config: CacheConfiguration) -> CacheConfiguration {
        config.statistics_enabled |= self.statistics_enabled;
        config.management_enabled |= self.management_enabled;
        config
    }
}

fn parse_flag(s: &str) -> bool {
    let s = s.trim().to_lowercase();
    s == "true" || s == "1"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfiguration::default();
        assert_eq!(config.expiry, ExpiryPolicy::Eternal);
        assert!(!config.statistics_enabled);
        assert!(!config.management_enabled);
        assert!(config.key_type.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_typed_configuration() {
        let config = CacheConfiguration::new().typed::<u64, String>();
        assert_eq!(config.key_type, Some(TypeDescriptor::of::<u64>()));
        assert_eq!(config.value_type, Some(TypeDescriptor::of::<String>()));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let config = CacheConfiguration::new().with_expiry(ExpiryPolicy::AfterAccess(Duration::ZERO));
        let err = config.validate().expect_err("zero ttl must fail");
        assert!(err.is_configuration());
    }

    #[test]
    fn test_snapshot_reflects_flags() {
        let snapshot = CacheConfiguration::new()
            .typed::<u64, String>()
            .with_read_through(true)
            .with_statistics(true)
            .snapshot();
        assert!(snapshot.read_through);
        assert!(!snapshot.write_through);
        assert!(snapshot.statistics_enabled);
        assert_eq!(snapshot.key_type_name.as_deref(), Some("u64"));

        let json = serde_json::to_value(&snapshot).expect("serialize");
        assert_eq!(json["readThrough"], true);
        assert_eq!(json["keyTypeName"], "u64");
    }

    #[test]
    fn test_expiry_policy_helpers() {
        assert_eq!(ExpiryPolicy::Eternal.ttl(), None);
        let ttl = Duration::from_secs(5);
        assert_eq!(ExpiryPolicy::AfterCreation(ttl).ttl(), Some(ttl));
        assert!(ExpiryPolicy::AfterAccess(ttl).refreshes_on_access());
        assert!(!ExpiryPolicy::AfterCreation(ttl).refreshes_on_access());
    }

    #[test]
    fn test_provider_config_applies_toggles() {
        let provider = ProviderConfig {
            statistics_enabled: true,
            ..ProviderConfig::default()
        };
        let config = provider.apply_to(CacheConfiguration::new());
        assert!(config.statistics_enabled);
        assert!(!config.management_enabled);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" 1 "));
        assert!(parse_flag("TRUE"));
        assert!(!parse_flag("yes"));
    }
}
