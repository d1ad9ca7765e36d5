//! Provisioning lifecycle protocol
//!
//! The provisioning system sends one request per resource transition and
//! waits for exactly one response, PUT to the pre-signed `ResponseURL`:
//!
//! ```text
//!  provisioning ──request──▶ LifecycleGateway ──▶ Seeder ──▶ ReconcileInvoker
//!       ▲                          │
//!       └──────── response ────────┘ (CallbackSink, exactly once)
//! ```
//!
//! - [`seeder`]: decides what a transition means (seed, re-seed, no-op)
//! - [`gateway`]: bounds the Seeder by a deadline and guarantees the response

pub mod gateway;
pub mod seeder;

pub use gateway::{LifecycleGateway, effective_deadline};
pub use seeder::{Seeder, new_physical_id};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Maximum size of a response body accepted by the provisioning system
pub const MAX_RESPONSE_BYTES: usize = 4096;

/// Provisioning transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

/// Custom resource properties understood by the Seeder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_token: Option<String>,

    /// Invocable address of the reconciliation entry point
    #[serde(rename = "LambdaARN", default)]
    pub lambda_arn: String,

    /// Force a Create to fail
    #[serde(default, deserialize_with = "flexible_bool")]
    pub fail_create: bool,
}

/// Property values arrive as strings
fn flexible_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

/// One provisioning request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleEvent {
    pub request_type: RequestType,

    pub request_id: String,

    #[serde(rename = "ResponseURL")]
    pub response_url: String,

    #[serde(default)]
    pub stack_id: String,

    #[serde(default)]
    pub logical_resource_id: String,

    /// Absent on Create, present on every later transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,

    #[serde(default)]
    pub resource_properties: ResourceProperties,
}

impl LifecycleEvent {
    /// The physical id carried by the request, ignoring blanks
    pub fn existing_physical_id(&self) -> Option<&str> {
        self.physical_resource_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Terminal status reported to the provisioning system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LifecycleStatus {
    Success,
    Failed,
}

/// What a transition produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleOutcome {
    Success,
    Failed(String),
}

/// Result of running one transition
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleResult {
    pub outcome: LifecycleOutcome,
    /// Identifier the provisioning system persists, present even on failure
    pub physical_resource_id: String,
    /// Outputs exposed to the provisioning system
    pub data: BTreeMap<String, Value>,
}

impl LifecycleResult {
    pub fn success(physical_resource_id: impl Into<String>, data: BTreeMap<String, Value>) -> Self {
        Self {
            outcome: LifecycleOutcome::Success,
            physical_resource_id: physical_resource_id.into(),
            data,
        }
    }

    pub fn failed(physical_resource_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            outcome: LifecycleOutcome::Failed(reason.into()),
            physical_resource_id: physical_resource_id.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == LifecycleOutcome::Success
    }
}

/// Response body PUT to `ResponseURL`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleResponse {
    pub status: LifecycleStatus,
    pub reason: String,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    pub no_echo: bool,
    pub data: BTreeMap<String, Value>,
}

impl LifecycleResponse {
    /// Build the response for `event`, truncated to the size limit
    pub fn new(event: &LifecycleEvent, result: LifecycleResult, log_hint: &str) -> Self {
        let (status, reason) = match result.outcome {
            LifecycleOutcome::Success => (
                LifecycleStatus::Success,
                format!("See the details in {}", log_hint),
            ),
            LifecycleOutcome::Failed(reason) => (LifecycleStatus::Failed, reason),
        };

        let response = Self {
            status,
            reason,
            physical_resource_id: result.physical_resource_id,
            stack_id: event.stack_id.clone(),
            request_id: event.request_id.clone(),
            logical_resource_id: event.logical_resource_id.clone(),
            no_echo: false,
            data: result.data,
        };
        response.fit_to_limit()
    }

    /// Serialized body
    pub fn to_body(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Shorten the reason until the body fits; drop data as a last resort
    fn fit_to_limit(mut self) -> Self {
        const ELLIPSIS: &str = "...";

        let size = |r: &Self| serde_json::to_vec(r).map(|b| b.len()).unwrap_or(usize::MAX);

        let mut len = size(&self);
        if len <= MAX_RESPONSE_BYTES {
            return self;
        }

        if !self.data.is_empty() {
            self.data.clear();
            len = size(&self);
            if len <= MAX_RESPONSE_BYTES {
                return self;
            }
        }

        let excess = len - MAX_RESPONSE_BYTES + ELLIPSIS.len();
        let mut keep = self.reason.len().saturating_sub(excess);
        while keep > 0 && !self.reason.is_char_boundary(keep) {
            keep -= 1;
        }
        self.reason.truncate(keep);
        self.reason.push_str(ELLIPSIS);

        // JSON escaping can make the reason longer on the wire than in memory.
        while size(&self) > MAX_RESPONSE_BYTES && self.reason.len() > ELLIPSIS.len() {
            let mut cut = self.reason.len() - ELLIPSIS.len() - 1;
            while cut > 0 && !self.reason.is_char_boundary(cut) {
                cut -= 1;
            }
            self.reason.truncate(cut);
            self.reason.push_str(ELLIPSIS);
        }
        self
    }
}

/// Invocation state machine
///
/// `Pending → Running → {Succeeded, Failed}`. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl InvocationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvocationState::Succeeded | InvocationState::Failed)
    }

    /// Move to `next`, refusing illegal transitions
    pub fn transition(self, next: InvocationState) -> Result<InvocationState> {
        use InvocationState::*;
        match (self, next) {
            (Pending, Running) | (Running, Succeeded) | (Running, Failed) => Ok(next),
            (from, to) => Err(Error::Other(format!(
                "Illegal lifecycle transition {:?} -> {:?}",
                from, to
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn event(request_type: RequestType, physical_id: Option<&str>) -> LifecycleEvent {
        LifecycleEvent {
            request_type,
            request_id: "req-1".to_string(),
            response_url: "https://callback.example/put".to_string(),
            stack_id: "arn:aws:cloudformation:us-east-1:123456789012:stack/demo/1".to_string(),
            logical_resource_id: "SeedIpSet".to_string(),
            physical_resource_id: physical_id.map(str::to_string),
            resource_type: Some("Custom::SeedIpSet".to_string()),
            resource_properties: ResourceProperties {
                service_token: None,
                lambda_arn: "arn:aws:lambda:us-east-1:123456789012:function:update".to_string(),
                fail_create: false,
            },
        }
    }

    #[test]
    fn test_parse_provisioning_request() {
        let e: LifecycleEvent = serde_json::from_str(
            r#"{
                "RequestType": "Create",
                "RequestId": "r-1",
                "ResponseURL": "https://cfn.example/resp",
                "StackId": "stack",
                "LogicalResourceId": "Seed",
                "ResourceType": "Custom::Seed",
                "ResourceProperties": {
                    "ServiceToken": "arn:aws:lambda:::function:seed",
                    "LambdaARN": "arn:aws:lambda:::function:update",
                    "FailCreate": "true"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(e.request_type, RequestType::Create);
        assert_eq!(e.existing_physical_id(), None);
        assert!(e.resource_properties.fail_create);
        assert_eq!(e.resource_properties.lambda_arn, "arn:aws:lambda:::function:update");
    }

    #[test]
    fn test_blank_physical_id_counts_as_absent() {
        let e = event(RequestType::Update, Some("  "));
        assert_eq!(e.existing_physical_id(), None);
    }

    #[test]
    fn test_response_wire_format() {
        let e = event(RequestType::Delete, Some("ipsync-seed-1"));
        let r = LifecycleResponse::new(
            &e,
            LifecycleResult::success("ipsync-seed-1", BTreeMap::new()),
            "log-stream",
        );
        let v: Value = serde_json::from_slice(&r.to_body().unwrap()).unwrap();

        assert_eq!(v["Status"], "SUCCESS");
        assert_eq!(v["PhysicalResourceId"], "ipsync-seed-1");
        assert_eq!(v["RequestId"], "req-1");
        assert_eq!(v["NoEcho"], false);
        assert!(v["Reason"].as_str().unwrap().contains("log-stream"));
    }

    #[test]
    fn test_long_reason_is_truncated() {
        let e = event(RequestType::Create, None);
        let r = LifecycleResponse::new(
            &e,
            LifecycleResult::failed("ipsync-seed-1", "é\"".repeat(5000)),
            "log-stream",
        );

        assert_eq!(r.status, LifecycleStatus::Failed);
        assert!(r.to_body().unwrap().len() <= MAX_RESPONSE_BYTES);
        assert!(r.reason.ends_with("..."));
    }

    #[test]
    fn test_state_machine() {
        let s = InvocationState::Pending;
        let s = s.transition(InvocationState::Running).unwrap();
        let s = s.transition(InvocationState::Failed).unwrap();
        assert!(s.is_terminal());
        assert!(s.transition(InvocationState::Succeeded).is_err());
        assert!(InvocationState::Pending.transition(InvocationState::Succeeded).is_err());
    }
}
