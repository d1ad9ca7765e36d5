// # HTTP IP Range Source
//
// This crate provides the HTTP-based IpRangeSource for ipsync.
//
// ## Purpose
//
// Downloads the publisher's `ip-ranges.json`, checks it against the digest
// announced in the change notification, and hands the parsed document to
// the core for filtering.
//
// ## Architecture
//
// Single-shot: one GET per fetch, no caching, no retries. A failed fetch is
// an `UpstreamFetch` error; the next notification is the retry.

use ipsync_core::config::SourceConfig;
use ipsync_core::registry::BackendRegistry;
use ipsync_core::traits::{FetchRequest, IpRangeSource, IpRangeSourceFactory};
use ipsync_core::{Error, IpRangeSnapshot, IpRangesDocument, Result};

use md5::{Digest, Md5};
use std::time::Duration;

/// Default request timeout
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// HTTP-based range source
pub struct HttpRangeSource {
    /// HTTP client
    client: reqwest::Client,
}

impl HttpRangeSource {
    /// Create a source with the given request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ipsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Create a source with the default timeout
    pub fn with_default_timeout() -> Result<Self> {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Download the raw document
    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::upstream(format!("Request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::upstream(format!(
                "{} returned HTTP {}",
                url,
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::upstream(format!("Failed to read response from {}: {}", url, e)))?;

        Ok(body.to_vec())
    }
}

/// Check `body` against an expected hex MD5 digest
pub fn verify_md5(body: &[u8], expected: &str) -> Result<()> {
    let actual = hex::encode(Md5::digest(body));
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(Error::upstream(format!(
            "MD5 Mismatch: got {} expected {}",
            actual, expected
        )))
    }
}

#[async_trait::async_trait]
impl IpRangeSource for HttpRangeSource {
    async fn fetch(&self, request: &FetchRequest) -> Result<IpRangeSnapshot> {
        tracing::debug!("Downloading IP ranges from {}", request.url);
        let body = self.download(&request.url).await?;

        match &request.expected_md5 {
            Some(expected) => verify_md5(&body, expected)?,
            None => tracing::debug!("No digest announced, skipping MD5 check"),
        }

        let document = IpRangesDocument::from_slice(&body)?;
        let snapshot = document.select(&request.filter)?;

        tracing::info!(
            "Fetched {} ranges for {} (syncToken={}, createDate={})",
            snapshot.len(),
            request.filter.service,
            snapshot.sync_token,
            snapshot.create_time
        );
        Ok(snapshot)
    }

    fn source_name(&self) -> &'static str {
        "http"
    }
}

/// Factory for creating HTTP range sources
pub struct HttpRangeSourceFactory;

impl IpRangeSourceFactory for HttpRangeSourceFactory {
    fn create(&self, config: &SourceConfig) -> Result<Box<dyn IpRangeSource>> {
        match config {
            SourceConfig::Http { timeout_secs, .. } => Ok(Box::new(HttpRangeSource::new(
                Duration::from_secs(*timeout_secs),
            )?)),
            _ => Err(Error::config("Invalid config for HTTP range source")),
        }
    }
}

/// Register the HTTP range source with a registry
pub fn register(registry: &BackendRegistry) {
    registry.register_source("http", Box::new(HttpRangeSourceFactory));
}
