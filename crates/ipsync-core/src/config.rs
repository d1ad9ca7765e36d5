//! Configuration types for ipsync
//!
//! This module defines all configuration structures used throughout the crate.
//! Loading from the environment is the binary's job; everything here is plain
//! serde data plus validation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::model::{AddressFamily, IpSetLimits, IpSetRef, IpSetScope, RangeFilter};

/// Where the publisher serves the document
pub const DEFAULT_SOURCE_URL: &str = "https://ip-ranges.amazonaws.com/ip-ranges.json";

/// Service tag selected when none is configured
pub const DEFAULT_SERVICE: &str = "CLOUDFRONT";

/// Main ipsync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Target IP set
    pub ip_set: IpSetConfig,

    /// Which published entries to keep
    #[serde(default)]
    pub filter: FilterConfig,

    /// Range source configuration
    #[serde(default)]
    pub source: SourceConfig,

    /// IP set store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Reconciler settings
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    /// Lifecycle (seeding) settings
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

impl SyncConfig {
    /// Create a configuration with defaults for the named IP set
    pub fn new(ip_set_name: impl Into<String>) -> Self {
        Self {
            ip_set: IpSetConfig::new(ip_set_name),
            filter: FilterConfig::default(),
            source: SourceConfig::default(),
            store: StoreConfig::default(),
            reconciler: ReconcilerConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.ip_set.validate()?;
        self.filter.validate()?;
        self.source.validate()?;
        self.store.validate()?;
        self.reconciler.validate()?;
        self.lifecycle.validate()?;
        Ok(())
    }

    /// The range filter implied by the filter settings and the IP set family
    ///
    /// An IP set holds a single address family, so the filter never admits
    /// the other one.
    pub fn range_filter(&self) -> RangeFilter {
        RangeFilter::new(self.filter.service.clone(), self.ip_set.family.into())
            .with_regions(self.filter.regions.clone())
    }

    /// Location of the published document
    pub fn source_url(&self) -> &str {
        match &self.source {
            SourceConfig::Http { url, .. } => url,
            SourceConfig::Custom { .. } => DEFAULT_SOURCE_URL,
        }
    }
}

/// Target IP set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpSetConfig {
    /// IP set name
    pub name: String,

    /// Regional or CloudFront (global) scope
    #[serde(default)]
    pub scope: IpSetScope,

    /// Address family held by the set
    #[serde(default = "default_family")]
    pub family: AddressFamily,

    /// Service-imposed limits
    #[serde(default)]
    pub limits: IpSetLimits,
}

impl IpSetConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: IpSetScope::default(),
            family: default_family(),
            limits: IpSetLimits::default(),
        }
    }

    pub fn with_family(mut self, family: AddressFamily) -> Self {
        self.family = family;
        self
    }

    pub fn with_limits(mut self, limits: IpSetLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn to_ref(&self) -> IpSetRef {
        IpSetRef {
            name: self.name.clone(),
            scope: self.scope,
            family: self.family,
        }
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.name.is_empty() {
            return Err(crate::Error::config("IP set name cannot be empty"));
        }
        if self.name.len() > 128 {
            return Err(crate::Error::config(format!(
                "IP set name too long: {} chars (max 128)",
                self.name.len()
            )));
        }
        if self.limits.capacity == 0 {
            return Err(crate::Error::config("IP set capacity must be > 0"));
        }
        if self.limits.max_mutations_per_call == 0 {
            return Err(crate::Error::config("Mutation ceiling must be > 0"));
        }
        Ok(())
    }
}

fn default_family() -> AddressFamily {
    AddressFamily::V4
}

/// Service/region filter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Service tag (e.g. "CLOUDFRONT")
    #[serde(default = "default_service")]
    pub service: String,

    /// Regions to keep; empty keeps all
    #[serde(default)]
    pub regions: Vec<String>,
}

impl FilterConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.service.trim().is_empty() {
            return Err(crate::Error::config("Service filter cannot be empty"));
        }
        if self.regions.iter().any(|r| r.trim().is_empty()) {
            return Err(crate::Error::config("Region filter contains an empty entry"));
        }
        Ok(())
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            service: default_service(),
            regions: Vec::new(),
        }
    }
}

fn default_service() -> String {
    DEFAULT_SERVICE.to_string()
}

/// Range source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Publisher document over HTTP(S)
    Http {
        /// URL of the document
        url: String,
        /// Request timeout in seconds
        #[serde(default = "default_http_timeout_secs")]
        timeout_secs: u64,
    },

    /// Custom source
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl SourceConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            SourceConfig::Http { url, timeout_secs } => {
                if url.is_empty() {
                    return Err(crate::Error::config("Source URL cannot be empty"));
                }
                if !url.starts_with("https://") && !url.starts_with("http://") {
                    return Err(crate::Error::config(format!(
                        "Source URL must use HTTP or HTTPS scheme. Got: {}",
                        url
                    )));
                }
                if *timeout_secs == 0 {
                    return Err(crate::Error::config("Source timeout must be > 0"));
                }
                Ok(())
            }
            SourceConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom source factory cannot be empty"));
                }
                if config.is_null() {
                    return Err(crate::Error::config("Custom source config cannot be null"));
                }
                Ok(())
            }
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            SourceConfig::Http { .. } => "http",
            SourceConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Http {
            url: DEFAULT_SOURCE_URL.to_string(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

fn default_http_timeout_secs() -> u64 {
    10
}

/// IP set store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// AWS WAFv2 IP set
    Wafv2 {
        /// Log intended updates without performing them
        #[serde(default)]
        dry_run: bool,
    },

    /// JSON file (local runs)
    File {
        /// Path to the file
        path: String,
    },

    /// In-memory (not persistent)
    Memory,

    /// Custom store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StoreConfig::File { path } if path.is_empty() => {
                Err(crate::Error::config("File store path cannot be empty"))
            }
            StoreConfig::Custom { factory, .. } if factory.is_empty() => {
                Err(crate::Error::config("Custom store factory cannot be empty"))
            }
            _ => Ok(()),
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            StoreConfig::Wafv2 { .. } => "wafv2",
            StoreConfig::File { .. } => "file",
            StoreConfig::Memory => "memory",
            StoreConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Wafv2 { dry_run: false }
    }
}

/// Upper bound for `retry_base_delay_ms`
pub const MAX_RETRY_BASE_DELAY_MS: u64 = 60_000;

/// Reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Attempts per batch for transient errors (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Delay before the first retry, doubled on each further retry (ms)
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Refuse snapshots older than the token recorded on the IP set
    #[serde(default)]
    pub reject_stale_snapshots: bool,

    /// Capacity of the observability event channel
    ///
    /// When full, events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl ReconcilerConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_attempts == 0 || self.max_attempts > 10 {
            return Err(crate::Error::config(format!(
                "max_attempts must be between 1 and 10. Got: {}",
                self.max_attempts
            )));
        }
        if self.retry_base_delay_ms > MAX_RETRY_BASE_DELAY_MS {
            return Err(crate::Error::config(format!(
                "retry_base_delay_ms must be at most {}. Got: {}",
                MAX_RETRY_BASE_DELAY_MS, self.retry_base_delay_ms
            )));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event_channel_capacity must be > 0"));
        }
        Ok(())
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            reject_stale_snapshots: false,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_max_attempts() -> usize {
    4
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

fn default_event_channel_capacity() -> usize {
    256
}

/// Lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Hard deadline for a lifecycle transition (seconds)
    ///
    /// Must leave room inside the function timeout for the callback itself.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,

    /// Time reserved before the platform deadline for sending the response (ms)
    #[serde(default = "default_safety_margin_ms")]
    pub safety_margin_ms: u64,
}

impl LifecycleConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if !(1..=900).contains(&self.deadline_secs) {
            return Err(crate::Error::config(format!(
                "Lifecycle deadline must be between 1 and 900 seconds. Got: {}",
                self.deadline_secs
            )));
        }
        Ok(())
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn safety_margin(&self) -> Duration {
        Duration::from_millis(self.safety_margin_ms)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
            safety_margin_ms: default_safety_margin_ms(),
        }
    }
}

fn default_deadline_secs() -> u64 {
    25
}

fn default_safety_margin_ms() -> u64 {
    2_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AddressFamilyFilter;

    #[test]
    fn test_defaults_validate() {
        let config = SyncConfig::new("cloudfront-allow");
        assert!(config.validate().is_ok());
        assert_eq!(config.source_url(), DEFAULT_SOURCE_URL);
        assert_eq!(config.store.type_name(), "wafv2");
    }

    #[test]
    fn test_filter_follows_ip_set_family() {
        let mut config = SyncConfig::new("allow-v6");
        config.ip_set = config.ip_set.with_family(AddressFamily::V6);
        config.filter.regions = vec!["GLOBAL".to_string()];

        let filter = config.range_filter();
        assert_eq!(filter.family, AddressFamilyFilter::V6);
        assert_eq!(filter.service, "CLOUDFRONT");
        assert_eq!(filter.regions, vec!["GLOBAL".to_string()]);
    }

    #[test]
    fn test_validation_failures() {
        assert!(SyncConfig::new("").validate().is_err());

        let mut config = SyncConfig::new("allow");
        config.reconciler.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::new("allow");
        config.reconciler.retry_base_delay_ms = MAX_RETRY_BASE_DELAY_MS;
        assert!(config.validate().is_ok());
        config.reconciler.retry_base_delay_ms = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::new("allow");
        config.source = SourceConfig::Http {
            url: "ftp://example.com".to_string(),
            timeout_secs: 5,
        };
        assert!(config.validate().is_err());

        let mut config = SyncConfig::new("allow");
        config.store = StoreConfig::File {
            path: String::new(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_store_config_deserializes_tagged() {
        let json = serde_json::json!({
            "ip_set": {"name": "allow"},
            "store": {"type": "file", "path": "/tmp/ipset.json"}
        });
        let config: SyncConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.store.type_name(), "file");
        assert_eq!(config.ip_set.limits, IpSetLimits::default());
    }
}
