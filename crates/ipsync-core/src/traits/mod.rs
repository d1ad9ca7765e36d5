//! Core traits for ipsync
//!
//! This module defines the seams between the core and its adapters.
//!
//! - [`IpRangeSource`]: Fetch the published IP ranges
//! - [`IpSetStore`]: Read and mutate the firewall IP set
//! - [`CallbackSink`]: Deliver lifecycle responses
//! - [`ReconcileInvoker`]: Run the reconciliation entry point for the Seeder

pub mod range_source;
pub mod ip_set_store;
pub mod callback;
pub mod invoker;

pub use range_source::{FetchRequest, IpRangeSource, IpRangeSourceFactory};
pub use ip_set_store::{IpSetStore, IpSetStoreFactory, MutationOutcome};
pub use callback::CallbackSink;
pub use invoker::ReconcileInvoker;
