// # IP Set Store Trait
//
// Defines the interface to the firewall's IP set.
//
// ## Implementations
//
// - AWS WAFv2: `ipsync-store-wafv2` crate
// - In-memory: `MemoryIpSetStore` (tests, dry runs)
// - JSON file: `FileIpSetStore` (local runs)
//
// ## Usage
//
// ```rust,ignore
// use ipsync_core::IpSetStore;
//
// let store = /* IpSetStore implementation */;
// let state = store.read().await?;
// store.add(&["5.6.7.0/24".parse()?], &stamp).await?;
// ```

use async_trait::async_trait;

use crate::model::{IpRange, IpSetLimits, IpSetRef, IpSetState, SyncStamp};

/// Result of one mutating call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationOutcome {
    /// Members actually inserted or deleted by this call
    pub changed: usize,
    /// Set size after the call
    pub size_after: usize,
}

/// Trait for IP set store implementations
///
/// # Idempotency
///
/// `add` and `remove` are set operations. Adding a member that is already
/// present, or removing one that is absent, changes nothing and is not an
/// error. Re-sending a batch whose outcome is unknown is therefore always
/// safe, whether the earlier attempt applied fully, partially, or not at all.
///
/// # Limits
///
/// - A call carrying more than `limits().max_mutations_per_call` ranges
///   must fail with `Error::MutationCeilingExceeded` and change nothing.
/// - A call that would grow the set past `limits().capacity` must fail with
///   `Error::CapacityExceeded` and change nothing.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform API calls to the firewall service only
/// - ✅ Translate service errors into the crate taxonomy
///   (`RateLimited`, `Conflict`, `MutationCeilingExceeded`, ...)
///
/// ## Forbidden Capabilities
/// - ❌ Retry, back off or sleep (owned by `Reconciler`)
/// - ❌ Decide what the set should contain (owned by `Reconciler`)
/// - ❌ Cache members across calls (the set is shared with other writers)
///
/// No client-side lock exists. Concurrent writers are resolved by the
/// service (last writer wins, or an optimistic-lock `Conflict`).
#[async_trait]
pub trait IpSetStore: Send + Sync {
    /// Read the current members and the applied sync token
    async fn read(&self) -> Result<IpSetState, crate::Error>;

    /// Insert ranges, stamping the set's metadata
    async fn add(
        &self,
        ranges: &[IpRange],
        stamp: &SyncStamp,
    ) -> Result<MutationOutcome, crate::Error>;

    /// Delete ranges, stamping the set's metadata
    async fn remove(
        &self,
        ranges: &[IpRange],
        stamp: &SyncStamp,
    ) -> Result<MutationOutcome, crate::Error>;

    /// The IP set this store is bound to
    fn target(&self) -> &IpSetRef;

    /// Limits of the bound IP set
    fn limits(&self) -> IpSetLimits;

    /// Store name (for logging)
    fn store_name(&self) -> &'static str;
}

/// Helper trait for constructing stores from configuration
#[async_trait]
pub trait IpSetStoreFactory: Send + Sync {
    async fn create(
        &self,
        config: &crate::config::SyncConfig,
    ) -> Result<Box<dyn IpSetStore>, crate::Error>;
}
