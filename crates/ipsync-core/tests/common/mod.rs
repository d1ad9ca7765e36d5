//! Test doubles and common utilities for contract tests
//!
//! Doubles wrap the real in-memory store where possible so that limits and
//! set semantics are the production ones; only faults are scripted.

#![allow(dead_code)]

use async_trait::async_trait;
use ipsync_core::config::ReconcilerConfig;
use ipsync_core::error::{Error, Result};
use ipsync_core::lifecycle::LifecycleResponse;
use ipsync_core::notification::ChangeNotification;
use ipsync_core::reconciler::ReconcileReport;
use ipsync_core::store::MemoryIpSetStore;
use ipsync_core::traits::{
    CallbackSink, FetchRequest, IpRangeSource, IpSetStore, MutationOutcome, ReconcileInvoker,
};
use ipsync_core::{
    AddressFamily, IpRange, IpRangeSnapshot, IpSetLimits, IpSetRef, IpSetScope, IpSetState,
    SyncStamp, SyncToken,
};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn ip_set_ref() -> IpSetRef {
    IpSetRef {
        name: "cloudfront-allow".to_string(),
        scope: IpSetScope::Regional,
        family: AddressFamily::V4,
    }
}

pub fn ranges(list: &[&str]) -> Vec<IpRange> {
    list.iter().map(|s| s.parse().expect("valid CIDR")).collect()
}

pub fn members(list: &[&str]) -> BTreeSet<IpRange> {
    ranges(list).into_iter().collect()
}

pub fn snapshot(token: u64, list: &[&str]) -> IpRangeSnapshot {
    IpRangeSnapshot::new(ranges(list), SyncToken(token), "2024-01-01-00-00-00")
}

/// `count` distinct /24 ranges starting at 10.0.0.0/24
pub fn numbered(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("10.{}.{}.0/24", i / 256, i % 256))
        .collect()
}

pub fn snapshot_of(token: u64, list: &[String]) -> IpRangeSnapshot {
    let refs: Vec<&str> = list.iter().map(String::as_str).collect();
    snapshot(token, &refs)
}

/// Reconciler settings with short retry delays
pub fn fast_config() -> ReconcilerConfig {
    ReconcilerConfig {
        retry_base_delay_ms: 1,
        ..ReconcilerConfig::default()
    }
}

/// A fault to inject into the next mutating call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    RateLimited,
    Conflict,
    /// Apply the batch, then report a throttle (outcome unknown to the caller)
    AppliedThenRateLimited,
    Store,
}

impl Fault {
    fn error(self) -> Error {
        match self {
            Fault::RateLimited | Fault::AppliedThenRateLimited => {
                Error::rate_limited("Rate exceeded")
            }
            Fault::Conflict => Error::conflict("lock token is stale"),
            Fault::Store => Error::store("internal failure"),
        }
    }
}

/// IpSetStore with scripted faults and call accounting
///
/// `declared` limits are what the store advertises; `enforced_ceiling`, if
/// set, is the real per-call ceiling, lower than advertised.
pub struct ScriptedIpSetStore {
    inner: MemoryIpSetStore,
    declared: IpSetLimits,
    enforced_ceiling: Option<usize>,
    faults: Arc<Mutex<VecDeque<Fault>>>,
    read_error: Arc<Mutex<bool>>,
    mutation_calls: Arc<AtomicUsize>,
    batch_sizes: Arc<Mutex<Vec<usize>>>,
}

impl ScriptedIpSetStore {
    pub fn new(current: &[&str]) -> Self {
        Self::with_limits(current, IpSetLimits::default())
    }

    pub fn with_limits(current: &[&str], limits: IpSetLimits) -> Self {
        Self {
            inner: MemoryIpSetStore::with_members(ip_set_ref(), limits, ranges(current)),
            declared: limits,
            enforced_ceiling: None,
            faults: Arc::new(Mutex::new(VecDeque::new())),
            read_error: Arc::new(Mutex::new(false)),
            mutation_calls: Arc::new(AtomicUsize::new(0)),
            batch_sizes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Advertise `declared` but reject calls above `ceiling`
    pub fn with_hidden_ceiling(mut self, ceiling: usize) -> Self {
        self.enforced_ceiling = Some(ceiling);
        self
    }

    /// Create a store that shares state and counters with an existing one
    pub fn sharing_state_with(other: &Self) -> Self {
        Self {
            inner: other.inner.clone(),
            declared: other.declared,
            enforced_ceiling: other.enforced_ceiling,
            faults: Arc::clone(&other.faults),
            read_error: Arc::clone(&other.read_error),
            mutation_calls: Arc::clone(&other.mutation_calls),
            batch_sizes: Arc::clone(&other.batch_sizes),
        }
    }

    pub fn push_fault(&self, fault: Fault) {
        self.faults.lock().unwrap().push_back(fault);
    }

    /// Make every call fail as if the service were unreachable
    pub fn make_unreachable(&self) {
        *self.read_error.lock().unwrap() = true;
    }

    pub fn mutation_calls(&self) -> usize {
        self.mutation_calls.load(Ordering::SeqCst)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    pub async fn members(&self) -> BTreeSet<IpRange> {
        self.inner.read().await.unwrap().members
    }

    pub async fn overwrite(&self, list: &[&str]) {
        self.inner.overwrite(ranges(list)).await;
    }

    async fn mutate(
        &self,
        add: bool,
        batch: &[IpRange],
        stamp: &SyncStamp,
    ) -> Result<MutationOutcome> {
        if *self.read_error.lock().unwrap() {
            return Err(Error::store("service unreachable"));
        }
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(ceiling) = self.enforced_ceiling {
            if batch.len() > ceiling {
                return Err(Error::MutationCeilingExceeded {
                    attempted: batch.len(),
                    limit: ceiling,
                });
            }
        }

        let fault = self.faults.lock().unwrap().pop_front();
        match fault {
            Some(Fault::AppliedThenRateLimited) => {}
            Some(other) => return Err(other.error()),
            None => {}
        }

        let outcome = if add {
            self.inner.add(batch, stamp).await?
        } else {
            self.inner.remove(batch, stamp).await?
        };
        self.batch_sizes.lock().unwrap().push(batch.len());

        match fault {
            Some(f @ Fault::AppliedThenRateLimited) => Err(f.error()),
            _ => Ok(outcome),
        }
    }
}

#[async_trait]
impl IpSetStore for ScriptedIpSetStore {
    async fn read(&self) -> Result<IpSetState> {
        if *self.read_error.lock().unwrap() {
            return Err(Error::store("service unreachable"));
        }
        self.inner.read().await
    }

    async fn add(&self, batch: &[IpRange], stamp: &SyncStamp) -> Result<MutationOutcome> {
        self.mutate(true, batch, stamp).await
    }

    async fn remove(&self, batch: &[IpRange], stamp: &SyncStamp) -> Result<MutationOutcome> {
        self.mutate(false, batch, stamp).await
    }

    fn target(&self) -> &IpSetRef {
        self.inner.target()
    }

    fn limits(&self) -> IpSetLimits {
        self.declared
    }

    fn store_name(&self) -> &'static str {
        "scripted"
    }
}

/// IpRangeSource returning a fixed snapshot (or failing)
pub struct StaticRangeSource {
    snapshot: Arc<Mutex<Option<IpRangeSnapshot>>>,
    fetch_count: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<FetchRequest>>>,
}

impl StaticRangeSource {
    pub fn new(snapshot: IpRangeSnapshot) -> Self {
        Self {
            snapshot: Arc::new(Mutex::new(Some(snapshot))),
            fetch_count: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A source whose publisher is down
    pub fn failing() -> Self {
        Self {
            snapshot: Arc::new(Mutex::new(None)),
            fetch_count: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            snapshot: Arc::clone(&other.snapshot),
            fetch_count: Arc::clone(&other.fetch_count),
            requests: Arc::clone(&other.requests),
        }
    }

    pub fn publish(&self, snapshot: IpRangeSnapshot) {
        *self.snapshot.lock().unwrap() = Some(snapshot);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl IpRangeSource for StaticRangeSource {
    async fn fetch(&self, request: &FetchRequest) -> Result<IpRangeSnapshot> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.snapshot
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::upstream("connection refused"))
    }

    fn source_name(&self) -> &'static str {
        "static"
    }
}

/// CallbackSink that records every delivery
pub struct RecordingSink {
    delivered: Arc<Mutex<Vec<(String, LifecycleResponse)>>>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            delivered: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        }
    }

    /// A sink whose deliveries always fail
    pub fn failing() -> Self {
        Self {
            delivered: Arc::new(Mutex::new(Vec::new())),
            fail: true,
        }
    }

    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            delivered: Arc::clone(&other.delivered),
            fail: other.fail,
        }
    }

    /// Every delivery attempt, successful or not
    pub fn delivered(&self) -> Vec<(String, LifecycleResponse)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallbackSink for RecordingSink {
    async fn deliver(&self, response_url: &str, response: &LifecycleResponse) -> Result<()> {
        self.delivered
            .lock()
            .unwrap()
            .push((response_url.to_string(), response.clone()));
        if self.fail {
            return Err(Error::callback("403 Forbidden: signature expired"));
        }
        Ok(())
    }
}

/// Invoker that never finishes in time
pub struct StallingInvoker {
    pub stall: Duration,
}

#[async_trait]
impl ReconcileInvoker for StallingInvoker {
    async fn invoke(&self, _target: &str, _n: &ChangeNotification) -> Result<ReconcileReport> {
        tokio::time::sleep(self.stall).await;
        Err(Error::invocation("stalled invoker woke up"))
    }
}

/// Invoker that panics
pub struct PanickingInvoker;

#[async_trait]
impl ReconcileInvoker for PanickingInvoker {
    async fn invoke(&self, _target: &str, _n: &ChangeNotification) -> Result<ReconcileReport> {
        panic!("invoker bug");
    }
}

/// Invoker that records what it was asked to run and replies with a report
#[derive(Default)]
pub struct RecordingInvoker {
    received: Arc<Mutex<Vec<ChangeNotification>>>,
}

impl RecordingInvoker {
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            received: other.received.clone(),
        }
    }

    pub fn received(&self) -> Vec<ChangeNotification> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReconcileInvoker for RecordingInvoker {
    async fn invoke(&self, _target: &str, n: &ChangeNotification) -> Result<ReconcileReport> {
        self.received.lock().unwrap().push(n.clone());
        Ok(ReconcileReport {
            added: 1,
            removed: 0,
            final_size: 1,
            batches: 1,
            sync_token: SyncToken(1),
        })
    }
}
