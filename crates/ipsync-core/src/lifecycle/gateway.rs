//! LifecycleGateway
//!
//! Adapter between the provisioning system and the [`Seeder`]:
//! - parses the request (and still answers malformed ones when it can)
//! - runs the Seeder in its own task under a deadline
//! - turns timeouts and panics into `FAILED`
//! - delivers exactly one response on every path
//!
//! A response that cannot be delivered leaves the provisioning system
//! waiting for its own timeout. That is the one error surfaced to the
//! caller of [`LifecycleGateway::handle`].

use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{error, info, warn};

use super::{
    InvocationState, LifecycleEvent, LifecycleOutcome, LifecycleResponse, LifecycleResult,
    LifecycleStatus, Seeder,
};
use crate::config::LifecycleConfig;
use crate::error::{Error, Result};
use crate::traits::CallbackSink;

/// Time the Seeder may use
///
/// The configured deadline, shortened so that a response can still be
/// sent before the platform stops the invocation.
pub fn effective_deadline(config: &LifecycleConfig, remaining: Option<Duration>) -> Duration {
    let configured = config.deadline();
    match remaining {
        Some(remaining) => configured.min(remaining.saturating_sub(config.safety_margin())),
        None => configured,
    }
}

pub struct LifecycleGateway {
    seeder: Arc<Seeder>,
    sink: Arc<dyn CallbackSink>,
    config: LifecycleConfig,
    log_hint: String,
}

impl LifecycleGateway {
    pub fn new(seeder: Arc<Seeder>, sink: Arc<dyn CallbackSink>, config: LifecycleConfig) -> Self {
        Self {
            seeder,
            sink,
            config,
            log_hint: "the function logs".to_string(),
        }
    }

    /// Where operators find details; quoted in successful responses
    pub fn with_log_hint(mut self, hint: impl Into<String>) -> Self {
        self.log_hint = hint.into();
        self
    }

    /// Handle a raw request
    ///
    /// A request that does not parse is answered `FAILED` if it names a
    /// `ResponseURL`; otherwise there is nobody to answer and the parse
    /// error is returned.
    pub async fn handle_value(
        &self,
        raw: Value,
        remaining: Option<Duration>,
    ) -> Result<LifecycleResponse> {
        match serde_json::from_value::<LifecycleEvent>(raw.clone()) {
            Ok(event) => self.handle(event, remaining).await,
            Err(parse_err) => {
                let Some(response_url) = raw.get("ResponseURL").and_then(Value::as_str) else {
                    return Err(Error::invalid_input(format!(
                        "Unparseable lifecycle request without ResponseURL: {}",
                        parse_err
                    )));
                };
                warn!("Malformed lifecycle request: {}", parse_err);

                let field = |name: &str| {
                    raw.get(name)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                let physical_id = raw
                    .get("PhysicalResourceId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(super::new_physical_id);
                let response = LifecycleResponse {
                    status: LifecycleStatus::Failed,
                    reason: format!("Malformed request: {}", parse_err),
                    physical_resource_id: physical_id,
                    stack_id: field("StackId"),
                    request_id: field("RequestId"),
                    logical_resource_id: field("LogicalResourceId"),
                    no_echo: false,
                    data: Default::default(),
                };
                self.deliver(response_url, response).await
            }
        }
    }

    /// Handle one request and deliver its response
    ///
    /// `remaining` is the time left before the platform ends the invocation.
    pub async fn handle(
        &self,
        event: LifecycleEvent,
        remaining: Option<Duration>,
    ) -> Result<LifecycleResponse> {
        let mut state = InvocationState::Pending;
        let physical_id = Seeder::physical_id_for(&event);
        let budget = effective_deadline(&self.config, remaining);

        state = state.transition(InvocationState::Running)?;
        info!(
            "{:?} {} ({}) running with a {:?} deadline",
            event.request_type, event.logical_resource_id, physical_id, budget
        );

        let result = self.run_bounded(&event, &physical_id, budget).await;

        state = state.transition(match result.outcome {
            LifecycleOutcome::Success => InvocationState::Succeeded,
            LifecycleOutcome::Failed(_) => InvocationState::Failed,
        })?;
        match &result.outcome {
            LifecycleOutcome::Success => info!("{} {:?}", physical_id, state),
            LifecycleOutcome::Failed(reason) => warn!("{} {:?}: {}", physical_id, state, reason),
        }

        let response = LifecycleResponse::new(&event, result, &self.log_hint);
        self.deliver(&event.response_url, response).await
    }

    async fn run_bounded(
        &self,
        event: &LifecycleEvent,
        physical_id: &str,
        budget: Duration,
    ) -> LifecycleResult {
        let seeder = self.seeder.clone();
        let task_event = event.clone();
        let task_id = physical_id.to_string();
        let seed_deadline = SystemTime::now() + budget;
        let mut task = tokio::spawn(async move {
            seeder
                .run_until(&task_event, &task_id, Some(seed_deadline))
                .await
        });

        match tokio::time::timeout(budget, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) if join_err.is_panic() => {
                error!("Seeder panicked for {}", physical_id);
                LifecycleResult::failed(physical_id, "Internal error: seeding task panicked")
            }
            Ok(Err(join_err)) => {
                LifecycleResult::failed(physical_id, format!("Seeding task aborted: {}", join_err))
            }
            Err(_) => {
                task.abort();
                let err = Error::deadline(format!("seeding did not finish within {:?}", budget));
                LifecycleResult::failed(physical_id, format!("{}: {}", err.kind(), err))
            }
        }
    }

    async fn deliver(
        &self,
        response_url: &str,
        response: LifecycleResponse,
    ) -> Result<LifecycleResponse> {
        match self.sink.deliver(response_url, &response).await {
            Ok(()) => {
                info!(
                    "Delivered {:?} for {}",
                    response.status, response.physical_resource_id
                );
                Ok(response)
            }
            Err(e) => {
                error!(
                    "CALLBACK NOT DELIVERED for {} ({:?}): {}",
                    response.physical_resource_id, response.status, e
                );
                match e {
                    Error::CallbackDelivery(_) => Err(e),
                    other => Err(Error::callback(other.to_string())),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_deadline() {
        let config = LifecycleConfig::default();

        assert_eq!(effective_deadline(&config, None), Duration::from_secs(25));
        assert_eq!(
            effective_deadline(&config, Some(Duration::from_secs(60))),
            Duration::from_secs(25)
        );
        assert_eq!(
            effective_deadline(&config, Some(Duration::from_secs(10))),
            Duration::from_secs(8)
        );
        assert_eq!(
            effective_deadline(&config, Some(Duration::from_secs(1))),
            Duration::ZERO
        );
    }
}
