//! Error types for ipsync
//!
//! Every failure that can cross the Seeder or notification-handler boundary
//! is one of these variants. Nothing leaves those boundaries unclassified.

use thiserror::Error;

/// Result type alias for ipsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for ipsync
#[derive(Error, Debug)]
pub enum Error {
    /// The range publisher was unreachable or returned malformed data
    #[error("Upstream fetch error: {0}")]
    UpstreamFetch(String),

    /// The filtered target is empty while the IP set is not
    #[error("Suspected empty update: target has 0 ranges, IP set holds {current}")]
    SuspectedEmptyUpdate {
        /// Number of ranges currently in the IP set
        current: usize,
    },

    /// The target would not fit into the IP set
    #[error("Capacity exceeded: {required} ranges required, capacity is {capacity}")]
    CapacityExceeded {
        /// Number of ranges the target needs
        required: usize,
        /// Capacity of the IP set
        capacity: usize,
    },

    /// The firewall service throttled the request
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// A single call carried more mutations than the service accepts
    #[error("Mutation ceiling exceeded: {attempted} mutations attempted, limit is {limit}")]
    MutationCeilingExceeded {
        /// Mutations carried by the rejected call
        attempted: usize,
        /// Per-call limit reported by the service
        limit: usize,
    },

    /// The lifecycle response could not be delivered
    #[error("Callback delivery error: {0}")]
    CallbackDelivery(String),

    /// Another writer changed the IP set between read and write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The caller's deadline would be missed
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// The snapshot is older than the one already applied
    #[error("Stale snapshot: token {snapshot} is older than applied token {applied}")]
    StaleSnapshot {
        /// Token of the rejected snapshot
        snapshot: u64,
        /// Token recorded on the IP set
        applied: u64,
    },

    /// IP set store errors that are not otherwise classified
    #[error("IP set store error: {0}")]
    Store(String),

    /// Invocation of the reconciliation entry point failed
    #[error("Invocation error: {0}")]
    Invocation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an upstream fetch error
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::UpstreamFetch(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a callback delivery error
    pub fn callback(msg: impl Into<String>) -> Self {
        Self::CallbackDelivery(msg.into())
    }

    /// Create an invocation error
    pub fn invocation(msg: impl Into<String>) -> Self {
        Self::Invocation(msg.into())
    }

    /// Create a deadline error
    pub fn deadline(msg: impl Into<String>) -> Self {
        Self::DeadlineExceeded(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether retrying the same call may succeed
    ///
    /// Only throttling and lost optimistic locks qualify. A mutation
    /// ceiling violation is handled by re-batching, not by retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Conflict(_))
    }

    /// Whether this is a data-quality guard rather than a failure to act
    pub fn is_guard(&self) -> bool {
        matches!(
            self,
            Self::SuspectedEmptyUpdate { .. } | Self::StaleSnapshot { .. }
        )
    }

    /// Short classification label used in logs and lifecycle reasons
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpstreamFetch(_) => "UpstreamFetchError",
            Self::SuspectedEmptyUpdate { .. } => "SuspectedEmptyUpdate",
            Self::CapacityExceeded { .. } => "CapacityExceeded",
            Self::RateLimited(_) => "RateLimited",
            Self::MutationCeilingExceeded { .. } => "MutationCeilingExceeded",
            Self::CallbackDelivery(_) => "CallbackDeliveryError",
            Self::Conflict(_) => "Conflict",
            Self::DeadlineExceeded(_) => "DeadlineExceeded",
            Self::StaleSnapshot { .. } => "StaleSnapshot",
            Self::Store(_) => "StoreError",
            Self::Invocation(_) => "InvocationError",
            Self::Config(_) => "ConfigError",
            Self::InvalidInput(_) => "InvalidInput",
            Self::Io(_) => "IoError",
            Self::Json(_) => "JsonError",
            Self::Other(_) => "Error",
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
