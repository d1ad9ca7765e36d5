// # AWS WAFv2 IP Set Store
//
// This crate provides the WAFv2 implementation of IpSetStore for ipsync.
//
// ## Implementation Status
//
// - ✅ One read-modify-write cycle per mutating call (GetIPSet + UpdateIPSet)
// - ✅ Lock-token concurrency: a lost race surfaces as `Conflict`
// - ✅ Service error codes mapped to the crate taxonomy
// - ✅ Dry-run mode for safe testing
// - ✅ No UpdateIPSet when the call changes nothing
// - ✅ IP set id discovered by name (ListIPSets) and remembered
// - ❌ NO retry logic (owned by Reconciler)
// - ❌ NO backoff logic (owned by Reconciler)
// - ❌ NO member caching (the set is shared with other writers)
//
// ## Trust Level: Untrusted (IP Set Store)
//
// **Allowed Capabilities**:
// - ✅ Perform WAFv2 API calls for the bound IP set only
// - ✅ Translate service errors
//
// **Forbidden Capabilities**:
// - ❌ Spawn tasks or threads
// - ❌ Retry, sleep or back off
// - ❌ Decide what the set should contain
//
// ## API Reference
//
// - ListIPSets: find the id of the named set within a scope
// - GetIPSet: addresses, description and the lock token
// - UpdateIPSet: replaces addresses and description, guarded by the lock token

use async_trait::async_trait;
use aws_sdk_wafv2::Client;
use aws_sdk_wafv2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_wafv2::types::{IpAddressVersion, Scope};
use ipsync_core::config::{StoreConfig, SyncConfig};
use ipsync_core::reconciler::MutationKind;
use ipsync_core::registry::BackendRegistry;
use ipsync_core::store::LocalIpSet;
use ipsync_core::traits::{IpSetStore, IpSetStoreFactory, MutationOutcome};
use ipsync_core::{
    AddressFamily, Error, IpRange, IpSetLimits, IpSetRef, IpSetScope, IpSetState, Result,
    SyncStamp,
};
use tokio::sync::OnceCell;

/// Page size for ListIPSets
const LIST_PAGE_SIZE: i32 = 100;

/// Environment switch for dry-run mode
const MODE_ENV: &str = "IPSYNC_MODE";

/// What a failed call was doing, for error classification
#[derive(Debug, Clone, Copy)]
pub struct CallContext {
    pub operation: &'static str,
    /// Set size the call would have produced
    pub required: usize,
    pub capacity: usize,
}

/// Map a WAFv2 error code onto the crate taxonomy
pub fn classify(ctx: CallContext, code: Option<&str>, detail: &str) -> Error {
    match code {
        Some("WAFOptimisticLockException") => Error::conflict(format!(
            "{}: IP set changed since it was read: {}",
            ctx.operation, detail
        )),
        Some("WAFLimitsExceededException") => Error::CapacityExceeded {
            required: ctx.required,
            capacity: ctx.capacity,
        },
        Some("ThrottlingException" | "TooManyRequestsException") => {
            Error::rate_limited(format!("{}: {}", ctx.operation, detail))
        }
        // Both ask the caller to try again later
        Some("WAFInternalErrorException" | "WAFUnavailableEntityException") => {
            Error::rate_limited(format!("{}: service busy: {}", ctx.operation, detail))
        }
        Some("WAFNonexistentItemException") => {
            Error::store(format!("{}: IP set not found: {}", ctx.operation, detail))
        }
        Some("AccessDeniedException") => Error::store(format!(
            "{}: access denied, check the execution role: {}",
            ctx.operation, detail
        )),
        Some(other) => Error::store(format!("{} failed ({}): {}", ctx.operation, other, detail)),
        None => Error::store(format!("{} failed: {}", ctx.operation, detail)),
    }
}

fn classify_sdk_error<E, R>(ctx: CallContext, err: SdkError<E, R>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let code = err.code().map(str::to_string);
    let detail = DisplayErrorContext(&err).to_string();
    classify(ctx, code.as_deref(), &detail)
}

/// Parse the address list of a WAF IP set
pub fn parse_addresses<S: AsRef<str>>(addresses: &[S]) -> Result<LocalIpSet> {
    let mut set = LocalIpSet::default();
    for address in addresses {
        let range: IpRange = address.as_ref().parse().map_err(|_| {
            Error::store(format!(
                "IP set holds an address that is not a CIDR: '{}'",
                address.as_ref()
            ))
        })?;
        set.addresses.insert(range);
    }
    Ok(set)
}

fn to_scope(scope: IpSetScope) -> Scope {
    match scope {
        IpSetScope::Regional => Scope::Regional,
        IpSetScope::Cloudfront => Scope::Cloudfront,
    }
}

fn family_of(version: &IpAddressVersion) -> Option<AddressFamily> {
    match version {
        IpAddressVersion::Ipv4 => Some(AddressFamily::V4),
        IpAddressVersion::Ipv6 => Some(AddressFamily::V6),
        _ => None,
    }
}

/// WAFv2 IP set store
///
/// # Dry-Run Mode
///
/// When `dry_run` is true, the store will:
/// - Perform all reads (ListIPSets, GetIPSet)
/// - Log the intended UpdateIPSet
/// - **NOT** modify the IP set
pub struct WafIpSetStore {
    client: Client,
    target: IpSetRef,
    limits: IpSetLimits,
    dry_run: bool,
    /// Id of the set, looked up on first use
    id: OnceCell<String>,
}

// The SDK client carries credentials providers; keep it out of logs
impl std::fmt::Debug for WafIpSetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WafIpSetStore")
            .field("client", &"<aws client>")
            .field("target", &self.target)
            .field("limits", &self.limits)
            .field("dry_run", &self.dry_run)
            .field("id", &self.id.get())
            .finish()
    }
}

impl WafIpSetStore {
    pub fn new(client: Client, target: IpSetRef, limits: IpSetLimits, dry_run: bool) -> Self {
        Self {
            client,
            target,
            limits,
            dry_run,
            id: OnceCell::new(),
        }
    }

    /// Skip the ListIPSets lookup when the id is already known
    pub fn with_id(self, id: impl Into<String>) -> Self {
        let cell = OnceCell::new_with(Some(id.into()));
        Self { id: cell, ..self }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn context(&self, operation: &'static str, required: usize) -> CallContext {
        CallContext {
            operation,
            required,
            capacity: self.limits.capacity,
        }
    }

    async fn ip_set_id(&self) -> Result<&str> {
        let id = self.id.get_or_try_init(|| self.lookup_id()).await?;
        Ok(id.as_str())
    }

    /// Find the set's id by name, following ListIPSets pagination
    async fn lookup_id(&self) -> Result<String> {
        tracing::debug!("Looking up IP set id for {}", self.target);
        let mut marker: Option<String> = None;

        loop {
            let page = self
                .client
                .list_ip_sets()
                .scope(to_scope(self.target.scope))
                .limit(LIST_PAGE_SIZE)
                .set_next_marker(marker.take())
                .send()
                .await
                .map_err(|e| classify_sdk_error(self.context("ListIPSets", 0), e))?;

            if let Some(summary) = page
                .ip_sets()
                .iter()
                .find(|s| s.name() == Some(self.target.name.as_str()))
            {
                let id = summary.id().ok_or_else(|| {
                    Error::store(format!("ListIPSets returned {} without an id", self.target))
                })?;
                tracing::debug!("Found IP set id: {}", id);
                return Ok(id.to_string());
            }

            match page.next_marker() {
                Some(next) if !page.ip_sets().is_empty() => marker = Some(next.to_string()),
                _ => break,
            }
        }

        Err(Error::store(format!("IP set not found: {}", self.target)))
    }

    /// Read the set together with its lock token
    async fn fetch(&self) -> Result<(LocalIpSet, String)> {
        let id = self.ip_set_id().await?;
        let output = self
            .client
            .get_ip_set()
            .name(&self.target.name)
            .scope(to_scope(self.target.scope))
            .id(id)
            .send()
            .await
            .map_err(|e| classify_sdk_error(self.context("GetIPSet", 0), e))?;

        let ip_set = output
            .ip_set()
            .ok_or_else(|| Error::store(format!("GetIPSet returned no IP set for {}", self.target)))?;
        let lock_token = output
            .lock_token()
            .ok_or_else(|| Error::store(format!("GetIPSet returned no lock token for {}", self.target)))?
            .to_string();

        if let Some(family) = family_of(ip_set.ip_address_version()) {
            if family != self.target.family {
                return Err(Error::config(format!(
                    "IP set {} holds {} addresses, expected {}",
                    self.target.name, family, self.target.family
                )));
            }
        }

        let mut set = parse_addresses(ip_set.addresses())?;
        set.description = ip_set.description().unwrap_or_default().to_string();
        Ok((set, lock_token))
    }

    async fn mutate(
        &self,
        kind: MutationKind,
        ranges: &[IpRange],
        stamp: &SyncStamp,
    ) -> Result<MutationOutcome> {
        let (mut set, lock_token) = self.fetch().await?;
        let before = set.addresses.len();
        let outcome = set.apply(kind, ranges, stamp, self.limits)?;

        if outcome.changed == 0 {
            tracing::debug!(
                "{} of {} ranges changes nothing in {}; skipping UpdateIPSet",
                kind,
                ranges.len(),
                self.target
            );
            return Ok(outcome);
        }

        tracing::info!(
            "{} IP set {}: {} {} ranges, {} -> {} [mode: {}]",
            if self.dry_run { "Would update" } else { "Updating" },
            self.target,
            kind,
            outcome.changed,
            before,
            outcome.size_after,
            if self.dry_run { "DRY-RUN" } else { "LIVE" }
        );

        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would send UpdateIPSet with {} addresses and description '{}'",
                set.addresses.len(),
                set.description
            );
            return Ok(outcome);
        }

        let addresses: Vec<String> = set.addresses.iter().map(|r| r.to_string()).collect();
        let id = self.ip_set_id().await?;
        self.client
            .update_ip_set()
            .name(&self.target.name)
            .scope(to_scope(self.target.scope))
            .id(id)
            .set_addresses(Some(addresses))
            .description(&set.description)
            .lock_token(lock_token)
            .send()
            .await
            .map_err(|e| classify_sdk_error(self.context("UpdateIPSet", outcome.size_after), e))?;

        Ok(outcome)
    }
}

#[async_trait]
impl IpSetStore for WafIpSetStore {
    async fn read(&self) -> Result<IpSetState> {
        let (set, _) = self.fetch().await?;
        Ok(set.state())
    }

    async fn add(&self, ranges: &[IpRange], stamp: &SyncStamp) -> Result<MutationOutcome> {
        self.mutate(MutationKind::Add, ranges, stamp).await
    }

    async fn remove(&self, ranges: &[IpRange], stamp: &SyncStamp) -> Result<MutationOutcome> {
        self.mutate(MutationKind::Remove, ranges, stamp).await
    }

    fn target(&self) -> &IpSetRef {
        &self.target
    }

    fn limits(&self) -> IpSetLimits {
        self.limits
    }

    fn store_name(&self) -> &'static str {
        "wafv2"
    }
}

/// Whether `IPSYNC_MODE` asks for a dry run
pub fn dry_run_from_env() -> bool {
    std::env::var(MODE_ENV)
        .unwrap_or_default()
        .eq_ignore_ascii_case("dry-run")
}

/// Factory for WAFv2 stores sharing one SDK client
pub struct WafIpSetStoreFactory {
    client: Client,
}

impl WafIpSetStoreFactory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IpSetStoreFactory for WafIpSetStoreFactory {
    async fn create(&self, config: &SyncConfig) -> Result<Box<dyn IpSetStore>> {
        match &config.store {
            StoreConfig::Wafv2 { dry_run } => {
                let dry_run = *dry_run || dry_run_from_env();
                if dry_run {
                    tracing::warn!("WAFv2 store running in DRY-RUN mode - no changes will be made");
                }
                Ok(Box::new(WafIpSetStore::new(
                    self.client.clone(),
                    config.ip_set.to_ref(),
                    config.ip_set.limits,
                    dry_run,
                )))
            }
            _ => Err(Error::config("Invalid config for WAFv2 store")),
        }
    }
}

/// Register the WAFv2 store with a registry
///
/// ```rust,ignore
/// let registry = BackendRegistry::with_local_stores();
/// let aws = aws_config::load_from_env().await;
/// ipsync_store_wafv2::register(&registry, aws_sdk_wafv2::Client::new(&aws));
/// ```
pub fn register(registry: &BackendRegistry, client: Client) {
    registry.register_store("wafv2", Box::new(WafIpSetStoreFactory::new(client)));
}
