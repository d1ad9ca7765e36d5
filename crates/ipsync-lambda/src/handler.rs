//! Event dispatch
//!
//! One function serves three kinds of input, told apart by shape:
//!
//! - `RequestType` present: a provisioning lifecycle request
//! - `Records` present: an SNS envelope of change notifications
//! - anything else: a direct invocation carrying one change notification
//!   (the Seeder's path)

use ipsync_core::lifecycle::LifecycleGateway;
use ipsync_core::notification::{ChangeNotification, NotificationHandler, SnsEnvelope};
use ipsync_core::{Error, Result};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Kind of inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Lifecycle,
    Envelope,
    Direct,
}

impl Inbound {
    pub fn classify(raw: &Value) -> Self {
        if raw.get("RequestType").is_some() {
            Inbound::Lifecycle
        } else if raw.get("Records").is_some() {
            Inbound::Envelope
        } else {
            Inbound::Direct
        }
    }
}

/// Time left until `deadline_ms` (milliseconds since the epoch)
///
/// `0` means the platform gave no deadline.
pub fn remaining_time(deadline_ms: u64) -> Option<Duration> {
    if deadline_ms == 0 {
        return None;
    }
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    Some(Duration::from_millis(deadline_ms.saturating_sub(now_ms)))
}

pub struct App {
    gateway: LifecycleGateway,
    notifications: Arc<NotificationHandler>,
    /// Reserved before the platform deadline on the direct path
    safety_margin: Duration,
}

impl App {
    pub fn new(
        gateway: LifecycleGateway,
        notifications: Arc<NotificationHandler>,
        safety_margin: Duration,
    ) -> Self {
        Self {
            gateway,
            notifications,
            safety_margin,
        }
    }

    /// Handle one event; `remaining` is the time left in the invocation
    pub async fn dispatch(&self, raw: Value, remaining: Option<Duration>) -> Result<Value> {
        let kind = Inbound::classify(&raw);
        tracing::debug!("Dispatching {:?} event", kind);
        let deadline = remaining.map(|r| Instant::now() + r.saturating_sub(self.safety_margin));

        match kind {
            Inbound::Lifecycle => {
                let response = self.gateway.handle_value(raw, remaining).await?;
                Ok(serde_json::to_value(&response)?)
            }
            Inbound::Envelope => {
                let envelope: SnsEnvelope = serde_json::from_value(raw)
                    .map_err(|e| Error::invalid_input(format!("Malformed SNS envelope: {}", e)))?;
                let outcomes = self
                    .notifications
                    .handle_envelope_until(&envelope, deadline)
                    .await;
                let applied = outcomes.iter().filter(|o| o.is_applied()).count();
                Ok(json!({
                    "applied": applied,
                    "dropped": outcomes.len() - applied,
                }))
            }
            Inbound::Direct => {
                let notification = ChangeNotification::try_from(raw)?;
                let report = self
                    .notifications
                    .handle_until(&notification, deadline)
                    .await?;
                Ok(serde_json::to_value(&report)?)
            }
        }
    }
}
