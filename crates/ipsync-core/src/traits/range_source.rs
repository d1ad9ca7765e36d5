// # IP Range Source Trait
//
// Defines the interface for fetching the published list of edge IP ranges.
//
// ## Implementations
//
// - HTTP (ip-ranges.json): `ipsync-source-http` crate
// - Tests: static and failing sources in `tests/common`
//
// ## Usage
//
// ```rust,ignore
// use ipsync_core::{IpRangeSource, FetchRequest, RangeFilter};
//
// let source = /* IpRangeSource implementation */;
// let snapshot = source.fetch(&FetchRequest::new(url, RangeFilter::default())).await?;
// println!("{} ranges at token {}", snapshot.len(), snapshot.sync_token);
// ```

use async_trait::async_trait;

use crate::model::{IpRangeSnapshot, RangeFilter};

/// What to fetch and how to check it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Location of the published document
    pub url: String,

    /// Expected MD5 digest (hex) of the document body
    ///
    /// `None` skips verification. Notifications carry the digest; the
    /// seeding request does not.
    pub expected_md5: Option<String>,

    /// Filter applied to the document
    pub filter: RangeFilter,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, filter: RangeFilter) -> Self {
        Self {
            url: url.into(),
            expected_md5: None,
            filter,
        }
    }

    pub fn with_md5(mut self, md5: Option<String>) -> Self {
        self.expected_md5 = md5;
        self
    }
}

/// Trait for IP range source implementations
///
/// # Trust Level: Semi-Trusted
///
/// ## Allowed Capabilities
/// - ✅ Perform network I/O to the publisher
/// - ✅ Verify integrity of what was fetched
/// - ✅ Parse and filter the document
///
/// ## Forbidden Capabilities
/// - ❌ Touch the IP set (use `IpSetStore`)
/// - ❌ Retry or back off (owned by the caller; the next notification
///   retries by definition)
/// - ❌ Cache snapshots across calls (every delivery observes fresh state)
///
/// Any failure, including an integrity mismatch or a malformed body, must
/// be reported as `Error::UpstreamFetch`.
#[async_trait]
pub trait IpRangeSource: Send + Sync {
    /// Fetch the current snapshot, filtered
    async fn fetch(&self, request: &FetchRequest) -> Result<IpRangeSnapshot, crate::Error>;

    /// Source name (for logging)
    fn source_name(&self) -> &'static str;
}

/// Helper trait for constructing range sources from configuration
pub trait IpRangeSourceFactory: Send + Sync {
    fn create(
        &self,
        config: &crate::config::SourceConfig,
    ) -> Result<Box<dyn IpRangeSource>, crate::Error>;
}
