//! Environment configuration for the Lambda binary
//!
//! All configuration is done via environment variables. `from_env` reads
//! them, `validate` rejects bad values with an actionable message, and
//! `to_sync_config` produces the library configuration.

use anyhow::Result;
use ipsync_core::config::{
    FilterConfig, IpSetConfig, LifecycleConfig, ReconcilerConfig, SourceConfig, StoreConfig,
    SyncConfig,
};
use ipsync_core::{AddressFamily, IpSetLimits, IpSetScope};
use std::str::FromStr;

/// Binary configuration, one field per variable
#[derive(Debug, Clone)]
pub struct Config {
    pub ipset_name: String,
    pub ipset_scope: String,
    pub address_family: String,
    pub service: String,
    pub regions: Vec<String>,
    pub source_url: String,
    pub store_type: String,
    pub store_path: Option<String>,
    pub capacity: Option<usize>,
    pub max_mutations: Option<usize>,
    pub max_attempts: Option<usize>,
    pub reject_stale: bool,
    pub lifecycle_deadline_secs: Option<u64>,
    pub dry_run: bool,
    pub log_level: String,
}

fn flag(value: Option<String>) -> bool {
    value.is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

fn number<T: FromStr>(name: &str, value: Option<String>) -> Result<Option<T>> {
    match value {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} must be a number. Got: '{}'", name, raw)),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let either = |primary: &str, alias: &str| var(primary).or_else(|| var(alias));

        let log_level = match var("IPSYNC_LOG_LEVEL") {
            Some(level) => level,
            None if flag(var("DEBUG")) => "debug".to_string(),
            None => "info".to_string(),
        };

        Ok(Self {
            ipset_name: either("IPSYNC_IPSET_NAME", "IPSET_NAME").unwrap_or_default(),
            ipset_scope: var("IPSYNC_IPSET_SCOPE").unwrap_or_else(|| "regional".to_string()),
            address_family: var("IPSYNC_ADDRESS_FAMILY").unwrap_or_else(|| "v4".to_string()),
            service: either("IPSYNC_SERVICE", "SERVICE")
                .unwrap_or_else(|| ipsync_core::config::DEFAULT_SERVICE.to_string()),
            regions: var("IPSYNC_REGIONS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            source_url: var("IPSYNC_SOURCE_URL")
                .unwrap_or_else(|| ipsync_core::config::DEFAULT_SOURCE_URL.to_string()),
            store_type: var("IPSYNC_STORE_TYPE").unwrap_or_else(|| "wafv2".to_string()),
            store_path: var("IPSYNC_STORE_PATH"),
            capacity: number("IPSYNC_CAPACITY", var("IPSYNC_CAPACITY"))?,
            max_mutations: number("IPSYNC_MAX_MUTATIONS", var("IPSYNC_MAX_MUTATIONS"))?,
            max_attempts: number("IPSYNC_MAX_ATTEMPTS", var("IPSYNC_MAX_ATTEMPTS"))?,
            reject_stale: flag(var("IPSYNC_REJECT_STALE")),
            lifecycle_deadline_secs: number(
                "IPSYNC_LIFECYCLE_DEADLINE_SECS",
                var("IPSYNC_LIFECYCLE_DEADLINE_SECS"),
            )?,
            dry_run: var("IPSYNC_MODE").is_some_and(|m| m.eq_ignore_ascii_case("dry-run")),
            log_level,
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.ipset_name.trim().is_empty() {
            anyhow::bail!(
                "IPSYNC_IPSET_NAME is required. \
                Set it via: export IPSYNC_IPSET_NAME=cloudfront-allow"
            );
        }

        IpSetScope::from_str(&self.ipset_scope)
            .map_err(|_| anyhow::anyhow!(
                "IPSYNC_IPSET_SCOPE '{}' is not supported. Supported scopes: regional, cloudfront",
                self.ipset_scope
            ))?;

        AddressFamily::from_str(&self.address_family)
            .map_err(|_| anyhow::anyhow!(
                "IPSYNC_ADDRESS_FAMILY '{}' is not supported. Supported families: v4, v6",
                self.address_family
            ))?;

        match self.store_type.as_str() {
            "wafv2" | "memory" => {}
            "file" => {
                if self.store_path.as_ref().is_none_or(|p| p.trim().is_empty()) {
                    anyhow::bail!(
                        "IPSYNC_STORE_PATH is required when IPSYNC_STORE_TYPE=file. \
                        Set it via: export IPSYNC_STORE_PATH=/tmp/ipset.json"
                    );
                }
            }
            other => anyhow::bail!(
                "IPSYNC_STORE_TYPE '{}' is not supported. Supported types: wafv2, file, memory",
                other
            ),
        }

        if !self.source_url.starts_with("https://") && !self.source_url.starts_with("http://") {
            anyhow::bail!(
                "IPSYNC_SOURCE_URL must use HTTP or HTTPS scheme. Got: {}",
                self.source_url
            );
        }

        if let Some(max_attempts) = self.max_attempts
            && (max_attempts == 0 || max_attempts > 10)
        {
            anyhow::bail!("IPSYNC_MAX_ATTEMPTS must be between 1 and 10. Got: {}", max_attempts);
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "IPSYNC_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    /// Build the library configuration
    pub fn to_sync_config(&self) -> Result<SyncConfig> {
        let defaults = IpSetLimits::default();
        let limits = IpSetLimits {
            capacity: self.capacity.unwrap_or(defaults.capacity),
            max_mutations_per_call: self.max_mutations.unwrap_or(defaults.max_mutations_per_call),
        };

        let mut ip_set = IpSetConfig::new(self.ipset_name.trim())
            .with_family(AddressFamily::from_str(&self.address_family)?)
            .with_limits(limits);
        ip_set.scope = IpSetScope::from_str(&self.ipset_scope)?;

        let store = match self.store_type.as_str() {
            "file" => StoreConfig::File {
                path: self.store_path.clone().unwrap_or_default(),
            },
            "memory" => StoreConfig::Memory,
            _ => StoreConfig::Wafv2 {
                dry_run: self.dry_run,
            },
        };

        let source = match SourceConfig::default() {
            SourceConfig::Http { timeout_secs, .. } => SourceConfig::Http {
                url: self.source_url.clone(),
                timeout_secs,
            },
            other => other,
        };

        let mut reconciler = ReconcilerConfig::default();
        if let Some(max_attempts) = self.max_attempts {
            reconciler.max_attempts = max_attempts;
        }
        reconciler.reject_stale_snapshots = self.reject_stale;

        let mut lifecycle = LifecycleConfig::default();
        if let Some(deadline) = self.lifecycle_deadline_secs {
            lifecycle.deadline_secs = deadline;
        }

        let config = SyncConfig {
            ip_set,
            filter: FilterConfig {
                service: self.service.clone(),
                regions: self.regions.clone(),
            },
            source,
            store,
            reconciler,
            lifecycle,
        };
        config.validate()?;
        Ok(config)
    }
}
