// # ipsync-core
//
// Core library for keeping a firewall IP set in step with a published
// list of edge IP ranges.
//
// ## Architecture Overview
//
// - **IpRangeSource**: Trait for fetching the published ranges
// - **IpSetStore**: Trait for reading and mutating the firewall IP set
// - **Reconciler**: Diffs a snapshot against the IP set and applies it idempotently
// - **NotificationHandler**: Reconciles on every change notification
// - **Seeder / LifecycleGateway**: Seeds the IP set during provisioning and
//   answers the provisioning system exactly once
// - **BackendRegistry**: Plugin-based registry for stores and sources
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Decisions live here, adapters only do I/O
// 2. **No Locks**: Safety comes from diffing against freshly read state
// 3. **Plugin-Based**: Backends are registered dynamically
// 4. **Library-First**: The Lambda binary is a thin shell over this crate

pub mod config;
pub mod document;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod notification;
pub mod reconciler;
pub mod registry;
pub mod store;
pub mod traits;

// Re-export core types for convenience
pub use config::{SourceConfig, StoreConfig, SyncConfig};
pub use document::IpRangesDocument;
pub use error::{Error, Result};
pub use lifecycle::{LifecycleEvent, LifecycleGateway, LifecycleResponse, Seeder};
pub use model::{
    AddressFamily, AddressFamilyFilter, IpRange, IpRangeSnapshot, IpSetLimits, IpSetRef,
    IpSetScope, IpSetState, RangeFilter, SyncStamp, SyncToken,
};
pub use notification::{ChangeNotification, LocalInvoker, NotificationHandler, SnsEnvelope};
pub use reconciler::{ReconcileEvent, ReconcileReport, Reconciler};
pub use registry::BackendRegistry;
pub use store::{FileIpSetStore, MemoryIpSetStore};
pub use traits::{CallbackSink, IpRangeSource, IpSetStore, ReconcileInvoker};
