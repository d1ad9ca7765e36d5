//! Plugin-based backend registry
//!
//! The registry maps store and source type names to factories, so the
//! binary builds its components from configuration without if-else chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ipsync_core::registry::BackendRegistry;
//!
//! let registry = BackendRegistry::with_local_stores();
//! ipsync_source_http::register(&registry);
//! ipsync_store_wafv2::register(&registry, waf_client);
//!
//! let store = registry.create_store(&config).await?;
//! let source = registry.create_source(&config.source)?;
//! ```
//!
//! ## Registration
//!
//! Adapter crates expose a `register` function:
//!
//! ```rust,ignore
//! pub fn register(registry: &BackendRegistry) {
//!     registry.register_source("http", Box::new(HttpRangeSourceFactory));
//! }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::{SourceConfig, SyncConfig};
use crate::error::{Error, Result};
use crate::store::{FileIpSetStoreFactory, MemoryIpSetStoreFactory};
use crate::traits::{IpRangeSource, IpRangeSourceFactory, IpSetStore, IpSetStoreFactory};

/// Registry of store and source factories
///
/// ## Thread Safety
///
/// Interior mutability with RwLock: concurrent lookups, exclusive
/// registration. A poisoned lock is recovered, since registration cannot
/// leave a map half-updated.
#[derive(Default)]
pub struct BackendRegistry {
    stores: RwLock<HashMap<String, Arc<dyn IpSetStoreFactory>>>,
    sources: RwLock<HashMap<String, Arc<dyn IpRangeSourceFactory>>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl BackendRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `memory` and `file` stores pre-registered
    pub fn with_local_stores() -> Self {
        let registry = Self::new();
        registry.register_store("memory", Box::new(MemoryIpSetStoreFactory));
        registry.register_store("file", Box::new(FileIpSetStoreFactory));
        registry
    }

    /// Register an IP set store factory under `name` (e.g. "wafv2", "file")
    pub fn register_store(&self, name: impl Into<String>, factory: Box<dyn IpSetStoreFactory>) {
        write(&self.stores).insert(name.into(), Arc::from(factory));
    }

    /// Register a range source factory under `name` (e.g. "http")
    pub fn register_source(&self, name: impl Into<String>, factory: Box<dyn IpRangeSourceFactory>) {
        write(&self.sources).insert(name.into(), Arc::from(factory));
    }

    /// Create the IP set store named by `config.store`
    pub async fn create_store(&self, config: &SyncConfig) -> Result<Box<dyn IpSetStore>> {
        let store_type = config.store.type_name();

        // Release the lock before the async create
        let factory = read(&self.stores)
            .get(store_type)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown store type: {}", store_type)))?;

        factory.create(config).await
    }

    /// Create the range source named by `config`
    pub fn create_source(&self, config: &SourceConfig) -> Result<Box<dyn IpRangeSource>> {
        let source_type = config.type_name();
        let sources = read(&self.sources);

        let factory = sources
            .get(source_type)
            .ok_or_else(|| Error::config(format!("Unknown source type: {}", source_type)))?;

        factory.create(config)
    }

    pub fn list_stores(&self) -> Vec<String> {
        read(&self.stores).keys().cloned().collect()
    }

    pub fn list_sources(&self) -> Vec<String> {
        read(&self.sources).keys().cloned().collect()
    }

    pub fn has_store(&self, name: &str) -> bool {
        read(&self.stores).contains_key(name)
    }

    pub fn has_source(&self, name: &str) -> bool {
        read(&self.sources).contains_key(name)
    }
}
