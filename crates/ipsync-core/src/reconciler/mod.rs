//! Reconciler
//!
//! The Reconciler is responsible for:
//! - Reading the current members of the IP set
//! - Guarding against suspicious targets (empty, oversized, stale)
//! - Computing the minimal diff against a target snapshot
//! - Applying the diff in ceiling-sized, idempotent batches
//! - Retrying transient store errors within the caller's deadline
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐
//! │ IpRangeSnapshot│─── target ───┐
//! └───────────────┘              │
//!                                ▼
//!                       ┌──────────────┐
//!                       │  Reconciler  │
//!                       └──────────────┘
//!                                │
//!          ┌─────────────────────┼─────────────────────┐
//!          │                     │                     │
//!          ▼                     ▼                     ▼
//! ┌─────────────┐       ┌──────────────┐       ┌─────────────┐
//! │ IpSetStore  │       │ ReconcilePlan│       │   Events    │
//! │ (read/write)│       │   (diff)     │       │  (notify)   │
//! └─────────────┘       └──────────────┘       └─────────────┘
//! ```
//!
//! ## Flow
//!
//! 1. Read current state from the store
//! 2. Reject stale or empty targets, abort on capacity overflow
//! 3. Plan `to_add` / `to_remove` and the order to apply them in
//! 4. Apply each phase in batches, shrinking batches on ceiling violations
//! 5. Report counts and the resulting size
//!
//! There is no lock around the IP set. Safety under concurrent or repeated
//! reconciliations comes from always diffing against freshly read state.

pub mod plan;

pub use plan::{ApplyOrder, MutationKind, ReconcilePlan};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ReconcilerConfig;
use crate::error::{Error, Result};
use crate::model::{IpRange, IpRangeSnapshot, IpSetState, SyncStamp, SyncToken};
use crate::traits::{IpSetStore, MutationOutcome};

/// Outcome of a successful reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Ranges inserted into the set
    pub added: usize,
    /// Ranges deleted from the set
    pub removed: usize,
    /// Set size after reconciliation
    pub final_size: usize,
    /// Mutating calls issued
    pub batches: usize,
    /// Token of the applied snapshot
    pub sync_token: SyncToken,
}

impl ReconcileReport {
    /// Whether the set was left untouched
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

/// Events emitted by the Reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    /// Reconciliation started
    Started {
        ip_set: String,
        sync_token: SyncToken,
        target_size: usize,
    },

    /// Diff computed
    Planned {
        to_add: usize,
        to_remove: usize,
        order: ApplyOrder,
    },

    /// One mutating call succeeded
    BatchApplied {
        kind: MutationKind,
        size: usize,
        changed: usize,
    },

    /// Reconciliation finished
    Completed { report: ReconcileReport },

    /// Target refused by a guard; nothing was mutated
    Rejected { reason: String },

    /// Reconciliation failed
    Failed { error: String },
}

/// Diff-based, idempotent reconciler for one IP set
pub struct Reconciler {
    /// Store bound to the target IP set
    store: Arc<dyn IpSetStore>,

    /// Retry and guard settings
    config: ReconcilerConfig,

    /// Service label written into the set's metadata
    service: String,

    /// Event sender for external monitoring
    event_tx: Option<mpsc::Sender<ReconcileEvent>>,
}

impl Reconciler {
    /// Create a reconciler for the store's IP set
    pub fn new(store: Arc<dyn IpSetStore>, config: ReconcilerConfig) -> Self {
        Self {
            store,
            config,
            service: crate::config::DEFAULT_SERVICE.to_string(),
            event_tx: None,
        }
    }

    /// Set the service label used in the IP set description
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Attach a bounded event channel
    ///
    /// Returns the receiver; events are dropped with a warning when it is full.
    pub fn with_events(mut self) -> (Self, mpsc::Receiver<ReconcileEvent>) {
        let (tx, rx) = mpsc::channel(self.config.event_channel_capacity);
        self.event_tx = Some(tx);
        (self, rx)
    }

    pub fn store(&self) -> &Arc<dyn IpSetStore> {
        &self.store
    }

    /// Reconcile the IP set against `target` with no deadline
    pub async fn reconcile(&self, target: &IpRangeSnapshot) -> Result<ReconcileReport> {
        self.reconcile_until(target, None).await
    }

    /// Reconcile the IP set against `target`
    ///
    /// Retries stop before `deadline`; a retry that would cross it surfaces
    /// as `DeadlineExceeded` instead of being attempted.
    pub async fn reconcile_until(
        &self,
        target: &IpRangeSnapshot,
        deadline: Option<Instant>,
    ) -> Result<ReconcileReport> {
        let result = self.run(target, deadline).await;
        match &result {
            Ok(report) => self.emit_event(ReconcileEvent::Completed {
                report: report.clone(),
            }),
            Err(e) if e.is_guard() => {
                warn!("Reconciliation of {} refused: {}", self.store.target(), e);
                self.emit_event(ReconcileEvent::Rejected {
                    reason: e.to_string(),
                });
            }
            Err(e) => self.emit_event(ReconcileEvent::Failed {
                error: e.to_string(),
            }),
        }
        result
    }

    /// Plan against the current state without mutating anything
    pub async fn preview(&self, target: &IpRangeSnapshot) -> Result<ReconcilePlan> {
        let current = self.store.read().await?;
        let target = target.restrict_to(self.store.target().family);
        Ok(ReconcilePlan::compute(
            &current.members,
            &target.members(),
            self.store.limits().capacity,
        ))
    }

    async fn run(
        &self,
        target: &IpRangeSnapshot,
        deadline: Option<Instant>,
    ) -> Result<ReconcileReport> {
        let ip_set = self.store.target().clone();
        let limits = self.store.limits();

        let family_target = target.restrict_to(ip_set.family);
        if family_target.len() != target.len() {
            debug!(
                "Ignoring {} ranges outside family {} of {}",
                target.len() - family_target.len(),
                ip_set.family,
                ip_set
            );
        }

        self.emit_event(ReconcileEvent::Started {
            ip_set: ip_set.name.clone(),
            sync_token: family_target.sync_token,
            target_size: family_target.len(),
        });

        let current = self.store.read().await?;
        self.check_guards(&current, &family_target, limits.capacity)?;

        let plan = ReconcilePlan::compute(
            &current.members,
            &family_target.members(),
            limits.capacity,
        );
        debug!(
            "Plan for {}: +{} -{} ({:?})",
            ip_set,
            plan.to_add.len(),
            plan.to_remove.len(),
            plan.order
        );
        self.emit_event(ReconcileEvent::Planned {
            to_add: plan.to_add.len(),
            to_remove: plan.to_remove.len(),
            order: plan.order,
        });

        let mut report = ReconcileReport {
            added: 0,
            removed: 0,
            final_size: current.len(),
            batches: 0,
            sync_token: family_target.sync_token,
        };

        if plan.is_empty() {
            debug!("{} already matches token {}", ip_set, family_target.sync_token);
            return Ok(report);
        }

        let stamp = family_target.stamp(self.service.clone());
        let mut batch_size = limits.max_mutations_per_call.max(1);

        for (kind, ranges) in plan.phases() {
            let mut offset = 0;
            while offset < ranges.len() {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    return Err(Error::deadline(format!(
                        "{} of {} {} ranges unapplied at the deadline",
                        ranges.len() - offset,
                        ranges.len(),
                        kind
                    )));
                }
                let end = (offset + batch_size).min(ranges.len());
                let chunk = &ranges[offset..end];

                match self.apply_batch(kind, chunk, &stamp, deadline).await {
                    Ok(outcome) => {
                        match kind {
                            MutationKind::Add => report.added += outcome.changed,
                            MutationKind::Remove => report.removed += outcome.changed,
                        }
                        report.final_size = outcome.size_after;
                        report.batches += 1;
                        offset = end;
                    }
                    Err(Error::MutationCeilingExceeded { attempted, limit }) if chunk.len() > 1 => {
                        batch_size = plan::shrink_batch(attempted.min(chunk.len()), limit);
                        warn!(
                            "Mutation ceiling hit on {} ({} ranges, limit {}); continuing with batches of {}",
                            ip_set, attempted, limit, batch_size
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        info!(
            "Reconciled {} to token {}: +{} -{} size={} batches={}",
            ip_set,
            report.sync_token,
            report.added,
            report.removed,
            report.final_size,
            report.batches
        );
        Ok(report)
    }

    fn check_guards(
        &self,
        current: &IpSetState,
        target: &IpRangeSnapshot,
        capacity: usize,
    ) -> Result<()> {
        if self.config.reject_stale_snapshots {
            if let Some(applied) = current.applied_token {
                if applied > target.sync_token {
                    return Err(Error::StaleSnapshot {
                        snapshot: target.sync_token.0,
                        applied: applied.0,
                    });
                }
            }
        }

        if target.is_empty() && !current.is_empty() {
            return Err(Error::SuspectedEmptyUpdate {
                current: current.len(),
            });
        }

        if target.len() > capacity {
            return Err(Error::CapacityExceeded {
                required: target.len(),
                capacity,
            });
        }

        Ok(())
    }

    /// Apply one batch, retrying transient failures
    ///
    /// Re-sending a batch is safe: the store treats it as a set operation.
    async fn apply_batch(
        &self,
        kind: MutationKind,
        chunk: &[IpRange],
        stamp: &SyncStamp,
        deadline: Option<Instant>,
    ) -> Result<MutationOutcome> {
        let mut attempt = 1;
        loop {
            let result = match kind {
                MutationKind::Add => self.store.add(chunk, stamp).await,
                MutationKind::Remove => self.store.remove(chunk, stamp).await,
            };

            match result {
                Ok(outcome) => {
                    debug!(
                        "Applied {} batch of {} ({} changed, size now {})",
                        kind,
                        chunk.len(),
                        outcome.changed,
                        outcome.size_after
                    );
                    self.emit_event(ReconcileEvent::BatchApplied {
                        kind,
                        size: chunk.len(),
                        changed: outcome.changed,
                    });
                    return Ok(outcome);
                }
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    let delay = self
                        .config
                        .retry_base_delay()
                        .saturating_mul(2u32.saturating_pow(attempt as u32 - 1));
                    if let Some(deadline) = deadline {
                        let resume = Instant::now().checked_add(delay);
                        if resume.is_none_or(|resume| resume >= deadline) {
                            return Err(Error::deadline(format!(
                                "{} batch of {} not applied before the deadline: {}",
                                kind,
                                chunk.len(),
                                e
                            )));
                        }
                    }
                    warn!(
                        "{} batch attempt {} on {} failed: {}; retrying in {:?}",
                        kind,
                        attempt,
                        self.store.store_name(),
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Emit a reconciler event
    fn emit_event(&self, event: ReconcileEvent) {
        if let Some(tx) = &self.event_tx {
            if tx.try_send(event).is_err() {
                warn!("Reconciler event channel full, dropping event. Consider increasing event_channel_capacity.");
            }
        }
    }
}
