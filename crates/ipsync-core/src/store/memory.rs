// # Memory IP Set Store
//
// In-memory implementation of IpSetStore.
//
// ## Purpose
//
// Stands in for the firewall service in tests and local dry runs. Enforces
// the same capacity and per-call ceiling as the real service.
//
// ## Crash Behavior
//
// - All members are lost on restart
// - The next reconciliation re-adds everything from the snapshot

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::LocalIpSet;
use crate::Error;
use crate::config::{StoreConfig, SyncConfig};
use crate::model::{IpRange, IpSetLimits, IpSetRef, IpSetState, SyncStamp};
use crate::reconciler::MutationKind;
use crate::traits::{IpSetStore, IpSetStoreFactory, MutationOutcome};

/// In-memory IP set
///
/// Clones share the same set.
///
/// # Example
///
/// ```rust,no_run
/// use ipsync_core::store::MemoryIpSetStore;
/// use ipsync_core::{IpSetLimits, IpSetRef, IpSetStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let target: IpSetRef = ipsync_core::config::IpSetConfig::new("allow").to_ref();
///     let store = MemoryIpSetStore::with_members(
///         target,
///         IpSetLimits::default(),
///         ["1.2.3.0/24".parse()?],
///     );
///
///     assert_eq!(store.read().await?.len(), 1);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryIpSetStore {
    target: IpSetRef,
    limits: IpSetLimits,
    inner: Arc<RwLock<LocalIpSet>>,
}

impl MemoryIpSetStore {
    /// Create an empty set
    pub fn new(target: IpSetRef, limits: IpSetLimits) -> Self {
        Self::with_members(target, limits, [])
    }

    /// Create a set holding `members`
    pub fn with_members(
        target: IpSetRef,
        limits: IpSetLimits,
        members: impl IntoIterator<Item = IpRange>,
    ) -> Self {
        Self {
            target,
            limits,
            inner: Arc::new(RwLock::new(LocalIpSet {
                description: String::new(),
                addresses: members.into_iter().collect(),
            })),
        }
    }

    /// Current description of the set
    pub async fn description(&self) -> String {
        self.inner.read().await.description.clone()
    }

    /// Replace the members, bypassing limits
    ///
    /// Simulates an out-of-band edit of the set.
    pub async fn overwrite(&self, members: impl IntoIterator<Item = IpRange>) {
        self.inner.write().await.addresses = members.into_iter().collect();
    }

    async fn mutate(
        &self,
        kind: MutationKind,
        ranges: &[IpRange],
        stamp: &SyncStamp,
    ) -> Result<MutationOutcome, Error> {
        let mut guard = self.inner.write().await;
        guard.apply(kind, ranges, stamp, self.limits)
    }
}

#[async_trait]
impl IpSetStore for MemoryIpSetStore {
    async fn read(&self) -> Result<IpSetState, Error> {
        Ok(self.inner.read().await.state())
    }

    async fn add(&self, ranges: &[IpRange], stamp: &SyncStamp) -> Result<MutationOutcome, Error> {
        self.mutate(MutationKind::Add, ranges, stamp).await
    }

    async fn remove(
        &self,
        ranges: &[IpRange],
        stamp: &SyncStamp,
    ) -> Result<MutationOutcome, Error> {
        self.mutate(MutationKind::Remove, ranges, stamp).await
    }

    fn target(&self) -> &IpSetRef {
        &self.target
    }

    fn limits(&self) -> IpSetLimits {
        self.limits
    }

    fn store_name(&self) -> &'static str {
        "memory"
    }
}

/// Factory for in-memory stores
pub struct MemoryIpSetStoreFactory;

#[async_trait]
impl IpSetStoreFactory for MemoryIpSetStoreFactory {
    async fn create(&self, config: &SyncConfig) -> Result<Box<dyn IpSetStore>, Error> {
        match &config.store {
            StoreConfig::Memory => Ok(Box::new(MemoryIpSetStore::new(
                config.ip_set.to_ref(),
                config.ip_set.limits,
            ))),
            other => Err(Error::config(format!(
                "Memory store factory cannot build a '{}' store",
                other.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IpSetConfig;
    use crate::model::SyncToken;

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = MemoryIpSetStore::new(IpSetConfig::new("allow").to_ref(), IpSetLimits::default());
        let clone = store.clone();
        let stamp = SyncStamp {
            token: SyncToken(3),
            create_time: "now".to_string(),
            service: "CLOUDFRONT".to_string(),
        };

        store.add(&["1.2.3.0/24".parse().unwrap()], &stamp).await.unwrap();

        let state = clone.read().await.unwrap();
        assert_eq!(state.len(), 1);
        assert_eq!(state.applied_token, Some(SyncToken(3)));
        assert!(clone.description().await.contains("CLOUDFRONT"));
    }

    #[tokio::test]
    async fn test_factory_rejects_other_store_types() {
        let mut config = SyncConfig::new("allow");
        assert!(MemoryIpSetStoreFactory.create(&config).await.is_err());

        config.store = StoreConfig::Memory;
        let store = MemoryIpSetStoreFactory.create(&config).await.unwrap();
        assert_eq!(store.store_name(), "memory");
        assert_eq!(store.target().name, "allow");
    }
}
