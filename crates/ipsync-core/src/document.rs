//! The published IP ranges document
//!
//! ```json
//! {
//!   "syncToken": "1700000000",
//!   "createDate": "2023-11-14-22-13-20",
//!   "prefixes": [
//!     { "ip_prefix": "13.32.0.0/15", "region": "GLOBAL",
//!       "service": "CLOUDFRONT", "network_border_group": "GLOBAL" }
//!   ],
//!   "ipv6_prefixes": [
//!     { "ipv6_prefix": "2600:9000::/28", "region": "GLOBAL",
//!       "service": "CLOUDFRONT", "network_border_group": "GLOBAL" }
//!   ]
//! }
//! ```
//!
//! Parsing and filtering live here so that every source (HTTP, inline
//! notification payloads, test fixtures) shares one interpretation.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{AddressFamily, IpRange, IpRangeSnapshot, RangeFilter, SyncToken};

/// Full publisher document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRangesDocument {
    #[serde(rename = "syncToken")]
    pub sync_token: String,

    #[serde(rename = "createDate")]
    pub create_date: String,

    #[serde(default)]
    pub prefixes: Vec<Ipv4PrefixEntry>,

    #[serde(default)]
    pub ipv6_prefixes: Vec<Ipv6PrefixEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4PrefixEntry {
    pub ip_prefix: String,
    pub region: String,
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_border_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv6PrefixEntry {
    pub ipv6_prefix: String,
    pub region: String,
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_border_group: Option<String>,
}

impl IpRangesDocument {
    /// Parse a document from raw bytes
    ///
    /// Malformed input is an upstream problem, not a local one.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::upstream(format!("Malformed IP ranges document: {}", e)))
    }

    /// Parse a document from an already-decoded JSON value
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::upstream(format!("Malformed IP ranges document: {}", e)))
    }

    pub fn sync_token(&self) -> Result<SyncToken> {
        self.sync_token
            .parse()
            .map_err(|_| Error::upstream(format!("Malformed syncToken: '{}'", self.sync_token)))
    }

    /// Apply a filter and produce a snapshot
    ///
    /// A single malformed prefix fails the whole document: a partially
    /// understood list must never be reconciled.
    pub fn select(&self, filter: &RangeFilter) -> Result<IpRangeSnapshot> {
        let token = self.sync_token()?;
        let mut ranges = Vec::new();

        for entry in &self.prefixes {
            if filter.matches(&entry.service, &entry.region, AddressFamily::V4) {
                ranges.push(parse_prefix(&entry.ip_prefix, AddressFamily::V4)?);
            }
        }

        for entry in &self.ipv6_prefixes {
            if filter.matches(&entry.service, &entry.region, AddressFamily::V6) {
                ranges.push(parse_prefix(&entry.ipv6_prefix, AddressFamily::V6)?);
            }
        }

        tracing::debug!(
            "Selected {} entries for service {} (syncToken={})",
            ranges.len(),
            filter.service,
            token
        );

        Ok(IpRangeSnapshot::new(ranges, token, self.create_date.clone()))
    }
}

fn parse_prefix(prefix: &str, expected: AddressFamily) -> Result<IpRange> {
    let range: IpRange = prefix
        .parse()
        .map_err(|_| Error::upstream(format!("Malformed prefix in document: '{}'", prefix)))?;
    if range.family() != expected {
        return Err(Error::upstream(format!(
            "Prefix '{}' listed under the wrong address family",
            prefix
        )));
    }
    Ok(range)
}
