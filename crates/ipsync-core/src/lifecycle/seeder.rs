//! Seeder
//!
//! Maps a provisioning transition onto at most one reconciliation:
//!
//! | request                    | action                         |
//! |----------------------------|--------------------------------|
//! | Create (no id)             | new id, seed                   |
//! | Create (id present)        | duplicate delivery, as Update  |
//! | Update                     | same id, seed again            |
//! | Delete                     | nothing, always succeeds       |
//!
//! A single attempt per transition. Errors are classified and returned as
//! a failed [`LifecycleResult`], never raised. The seed notification carries
//! the caller's deadline so that the reconciliation stops when the caller
//! stops listening.

use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{info, warn};

use super::{LifecycleEvent, LifecycleResult, RequestType};
use crate::notification::ChangeNotification;
use crate::reconciler::ReconcileReport;
use crate::traits::ReconcileInvoker;

const PHYSICAL_ID_PREFIX: &str = "ipsync-seed-";

/// Generate a fresh physical resource id
pub fn new_physical_id() -> String {
    format!("{}{}", PHYSICAL_ID_PREFIX, uuid::Uuid::new_v4())
}

pub struct Seeder {
    invoker: Arc<dyn ReconcileInvoker>,
    source_url: String,
}

impl Seeder {
    /// `source_url` is where the seed notification points the reconciler
    pub fn new(invoker: Arc<dyn ReconcileInvoker>, source_url: impl Into<String>) -> Self {
        Self {
            invoker,
            source_url: source_url.into(),
        }
    }

    /// The id a response to `event` must carry
    ///
    /// The request's own id when it has one, a fresh one otherwise.
    pub fn physical_id_for(event: &LifecycleEvent) -> String {
        event
            .existing_physical_id()
            .map(str::to_string)
            .unwrap_or_else(new_physical_id)
    }

    /// Run one transition under the given physical id
    pub async fn run(&self, event: &LifecycleEvent, physical_id: &str) -> LifecycleResult {
        self.run_until(event, physical_id, None).await
    }

    /// Run one transition whose reconciliation must end by `deadline`
    pub async fn run_until(
        &self,
        event: &LifecycleEvent,
        physical_id: &str,
        deadline: Option<SystemTime>,
    ) -> LifecycleResult {
        let request_type = match (event.request_type, event.existing_physical_id()) {
            (RequestType::Create, Some(existing)) => {
                warn!(
                    "Create for {} already carries id {}; handling as Update",
                    event.logical_resource_id, existing
                );
                RequestType::Update
            }
            (other, _) => other,
        };

        match request_type {
            RequestType::Delete => {
                info!(
                    "Delete of {}: leaving the IP set in place",
                    physical_id
                );
                LifecycleResult::success(physical_id, BTreeMap::new())
            }
            RequestType::Create if event.resource_properties.fail_create => {
                LifecycleResult::failed(physical_id, "Create failure requested by FailCreate")
            }
            RequestType::Create | RequestType::Update => {
                self.seed(event, physical_id, deadline).await
            }
        }
    }

    async fn seed(
        &self,
        event: &LifecycleEvent,
        physical_id: &str,
        deadline: Option<SystemTime>,
    ) -> LifecycleResult {
        let target = event.resource_properties.lambda_arn.trim();
        if target.is_empty() {
            return LifecycleResult::failed(physical_id, "ResourceProperties.LambdaARN is required");
        }

        info!(
            "{:?} {}: seeding via {}",
            event.request_type, physical_id, target
        );
        let mut notification = ChangeNotification::seed(self.source_url.clone());
        if let Some(deadline) = deadline {
            notification = notification.with_deadline(deadline);
        }

        match self.invoker.invoke(target, &notification).await {
            Ok(report) if report.final_size == 0 => {
                warn!("Seeding {} left the IP set empty", physical_id);
                LifecycleResult::failed(
                    physical_id,
                    format!(
                        "Seeding left the IP set empty (syncToken {})",
                        report.sync_token
                    ),
                )
            }
            Ok(report) => {
                info!(
                    "Seeded {}: +{} -{} size={}",
                    physical_id, report.added, report.removed, report.final_size
                );
                LifecycleResult::success(physical_id, report_data(&report))
            }
            Err(e) => {
                warn!("Seeding {} failed: {}", physical_id, e);
                LifecycleResult::failed(physical_id, format!("{}: {}", e.kind(), e))
            }
        }
    }
}

fn report_data(report: &ReconcileReport) -> BTreeMap<String, Value> {
    let mut data = BTreeMap::new();
    data.insert("Added".to_string(), json!(report.added));
    data.insert("Removed".to_string(), json!(report.removed));
    data.insert("Size".to_string(), json!(report.final_size));
    data.insert("SyncToken".to_string(), json!(report.sync_token.to_string()));
    data.insert(
        "Response".to_string(),
        json!(format!(
            "Added {} and removed {} ranges, {} in set",
            report.added, report.removed, report.final_size
        )),
    );
    data
}
