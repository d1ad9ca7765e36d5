//! Value types shared by every component
//!
//! - [`IpRange`]: a normalized CIDR block
//! - [`IpRangeSnapshot`]: a versioned, filtered list of ranges
//! - [`IpSetRef`], [`IpSetState`], [`IpSetLimits`]: the firewall IP set
//! - [`SyncStamp`]: the out-of-band metadata written with every mutation

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Address family of a range or an IP set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    V4,
    V6,
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "IPV4"),
            AddressFamily::V6 => write!(f, "IPV6"),
        }
    }
}

impl FromStr for AddressFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v4" | "ipv4" | "4" => Ok(AddressFamily::V4),
            "v6" | "ipv6" | "6" => Ok(AddressFamily::V6),
            other => Err(Error::config(format!("Unknown address family: '{}'", other))),
        }
    }
}

/// Address families accepted by a [`RangeFilter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamilyFilter {
    /// IPv4 only
    V4,
    /// IPv6 only
    V6,
    /// Both families
    Both,
}

impl AddressFamilyFilter {
    pub fn accepts(&self, family: AddressFamily) -> bool {
        match self {
            AddressFamilyFilter::V4 => family == AddressFamily::V4,
            AddressFamilyFilter::V6 => family == AddressFamily::V6,
            AddressFamilyFilter::Both => true,
        }
    }
}

impl From<AddressFamily> for AddressFamilyFilter {
    fn from(family: AddressFamily) -> Self {
        match family {
            AddressFamily::V4 => AddressFamilyFilter::V4,
            AddressFamily::V6 => AddressFamilyFilter::V6,
        }
    }
}

/// A CIDR block
///
/// The network is truncated to its prefix on construction, so
/// `10.0.0.7/8` and `10.0.0.0/8` are the same range. Equality and ordering
/// are structural.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpRange {
    net: IpNet,
}

impl IpRange {
    /// Create a range from a network, normalizing host bits away
    pub fn new(net: IpNet) -> Self {
        Self { net: net.trunc() }
    }

    /// The underlying network
    pub fn net(&self) -> IpNet {
        self.net
    }

    /// Address family of this range
    pub fn family(&self) -> AddressFamily {
        match self.net {
            IpNet::V4(_) => AddressFamily::V4,
            IpNet::V6(_) => AddressFamily::V6,
        }
    }
}

impl FromStr for IpRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let net: IpNet = s
            .trim()
            .parse()
            .map_err(|e| Error::invalid_input(format!("Invalid CIDR '{}': {}", s, e)))?;
        Ok(Self::new(net))
    }
}

impl TryFrom<String> for IpRange {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<IpRange> for String {
    fn from(range: IpRange) -> Self {
        range.to_string()
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.net)
    }
}

/// Publisher-assigned version of a snapshot
///
/// The publisher uses the unix time of publication, so a larger token is a
/// newer snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncToken(pub u64);

impl FromStr for SyncToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(SyncToken)
            .map_err(|_| Error::invalid_input(format!("Invalid sync token: '{}'", s)))
    }
}

impl fmt::Display for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which published entries are relevant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeFilter {
    /// Service tag, compared case-insensitively (e.g. "CLOUDFRONT")
    pub service: String,

    /// Regions to keep; empty keeps every region
    #[serde(default)]
    pub regions: Vec<String>,

    /// Address families to keep
    pub family: AddressFamilyFilter,
}

impl RangeFilter {
    pub fn new(service: impl Into<String>, family: AddressFamilyFilter) -> Self {
        Self {
            service: service.into(),
            regions: Vec::new(),
            family,
        }
    }

    pub fn with_regions(mut self, regions: Vec<String>) -> Self {
        self.regions = regions;
        self
    }

    /// Whether a published entry passes this filter
    pub fn matches(&self, service: &str, region: &str, family: AddressFamily) -> bool {
        if !service.eq_ignore_ascii_case(&self.service) {
            return false;
        }
        if !self.family.accepts(family) {
            return false;
        }
        self.regions.is_empty() || self.regions.iter().any(|r| r.eq_ignore_ascii_case(region))
    }
}

impl Default for RangeFilter {
    fn default() -> Self {
        Self::new("CLOUDFRONT", AddressFamilyFilter::V4)
    }
}

/// A versioned, filtered, duplicate-free list of ranges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRangeSnapshot {
    /// Ranges in ascending order, without duplicates
    ranges: Vec<IpRange>,

    /// Publisher version
    pub sync_token: SyncToken,

    /// Publisher creation time, as published
    pub create_time: String,
}

impl IpRangeSnapshot {
    pub fn new(
        ranges: impl IntoIterator<Item = IpRange>,
        sync_token: SyncToken,
        create_time: impl Into<String>,
    ) -> Self {
        let unique: BTreeSet<IpRange> = ranges.into_iter().collect();
        Self {
            ranges: unique.into_iter().collect(),
            sync_token,
            create_time: create_time.into(),
        }
    }

    pub fn ranges(&self) -> &[IpRange] {
        &self.ranges
    }

    pub fn members(&self) -> BTreeSet<IpRange> {
        self.ranges.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Keep only the ranges of one family
    pub fn restrict_to(&self, family: AddressFamily) -> Self {
        Self {
            ranges: self
                .ranges
                .iter()
                .copied()
                .filter(|r| r.family() == family)
                .collect(),
            sync_token: self.sync_token,
            create_time: self.create_time.clone(),
        }
    }

    pub fn stamp(&self, service: impl Into<String>) -> SyncStamp {
        SyncStamp {
            token: self.sync_token,
            create_time: self.create_time.clone(),
            service: service.into(),
        }
    }
}

/// IP set scope as understood by the firewall service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpSetScope {
    #[default]
    Regional,
    Cloudfront,
}

impl fmt::Display for IpSetScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpSetScope::Regional => write!(f, "REGIONAL"),
            IpSetScope::Cloudfront => write!(f, "CLOUDFRONT"),
        }
    }
}

impl FromStr for IpSetScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "regional" => Ok(IpSetScope::Regional),
            "cloudfront" | "global" => Ok(IpSetScope::Cloudfront),
            other => Err(Error::config(format!("Unknown IP set scope: '{}'", other))),
        }
    }
}

/// Address of an IP set: {name, scope, family}
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpSetRef {
    pub name: String,
    pub scope: IpSetScope,
    pub family: AddressFamily,
}

impl fmt::Display for IpSetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.scope, self.name, self.family)
    }
}

/// Limits imposed by the firewall service on an IP set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpSetLimits {
    /// Maximum number of ranges the set can hold
    pub capacity: usize,
    /// Maximum number of ranges one mutating call may add or remove
    pub max_mutations_per_call: usize,
}

impl Default for IpSetLimits {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            max_mutations_per_call: 1_000,
        }
    }
}

/// Observed state of an IP set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpSetState {
    pub members: BTreeSet<IpRange>,
    /// Token of the last snapshot written into the set's metadata
    pub applied_token: Option<SyncToken>,
}

impl IpSetState {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Metadata written alongside every mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStamp {
    pub token: SyncToken,
    pub create_time: String,
    pub service: String,
}

/// WAF descriptions are limited to 256 characters
const MAX_DESCRIPTION_LEN: usize = 256;

const TOKEN_MARKER: &str = "syncToken=";

impl SyncStamp {
    /// Render the stamp as an IP set description
    ///
    /// Characters outside the firewall service's description alphabet are
    /// replaced with '-'. The token always survives truncation.
    pub fn description(&self) -> String {
        let suffix = format!(", {}{}", TOKEN_MARKER, self.token);
        let head = format!(
            "IP Address ranges for service {} as of {}",
            sanitize(&self.service),
            sanitize(&self.create_time)
        );
        let room = MAX_DESCRIPTION_LEN.saturating_sub(suffix.len());
        let head: String = head.chars().take(room).collect();
        format!("{}{}", head.trim_end(), suffix)
    }

    /// Recover the token from a description written by [`SyncStamp::description`]
    pub fn parse_token(description: &str) -> Option<SyncToken> {
        let start = description.rfind(TOKEN_MARKER)? + TOKEN_MARKER.len();
        let digits: String = description[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok().map(SyncToken)
    }
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || " _+=:#@/-,.".contains(c) {
                c
            } else {
                '-'
            }
        })
        .collect()
}
