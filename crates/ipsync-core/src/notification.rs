//! Notification-driven reconciliation
//!
//! The range publisher announces every change with a small JSON message:
//!
//! ```json
//! {"create-time": "2024-01-01-00-00-00", "synctoken": "1704067200",
//!  "md5": "6a1b...", "url": "https://ip-ranges.amazonaws.com/ip-ranges.json"}
//! ```
//!
//! Deliveries are at-least-once and unordered. Each one is handled on its
//! own: fetch (or take the inline document), filter, reconcile. Nothing is
//! derived from the notification except where to find the snapshot, so a
//! duplicate simply computes an empty diff.
//!
//! A caller waiting on the result (the Seeder) adds `"deadline-ms"`, the
//! epoch millisecond after which it no longer listens. Retries stop there.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::document::IpRangesDocument;
use crate::error::{Error, Result};
use crate::model::{IpRangeSnapshot, RangeFilter};
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::traits::{FetchRequest, IpRangeSource, ReconcileInvoker};

/// Digest placeholder meaning "do not verify"
pub const SEED_DIGEST: &str = "seed";

/// Where the snapshot of a notification lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotPayload {
    /// Fetch from `url`, verifying `md5` when present
    Pointer { url: String, md5: Option<String> },
    /// The document travelled with the notification
    Inline(IpRangesDocument),
}

/// A change announcement from the range publisher
///
/// Serializes to and from the publisher's message format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct ChangeNotification {
    pub create_time: String,
    pub sync_token: Option<String>,
    pub payload: SnapshotPayload,
    /// Epoch milliseconds after which the sender stops waiting
    pub deadline_ms: Option<u64>,
}

impl ChangeNotification {
    /// Notification asking for the current document at `url`, unverified
    ///
    /// Used for seeding, where no published digest exists.
    pub fn seed(url: impl Into<String>) -> Self {
        Self {
            create_time: "Initial Seed".to_string(),
            sync_token: None,
            payload: SnapshotPayload::Pointer {
                url: url.into(),
                md5: None,
            },
            deadline_ms: None,
        }
    }

    /// Ask the receiver to give up at `deadline`
    pub fn with_deadline(mut self, deadline: SystemTime) -> Self {
        self.deadline_ms = deadline
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_millis() as u64);
        self
    }

    /// Time left before the sender's deadline, zero once it has passed
    pub fn remaining(&self) -> Option<Duration> {
        let deadline_ms = self.deadline_ms?;
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Some(Duration::from_millis(deadline_ms.saturating_sub(now_ms)))
    }

    /// Parse an SNS `Message` body
    pub fn parse(message: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(message)
            .map_err(|e| Error::invalid_input(format!("Notification is not JSON: {}", e)))?;
        Self::try_from(value)
    }
}

#[derive(Deserialize)]
struct PointerMessage {
    #[serde(rename = "create-time", default)]
    create_time: String,
    #[serde(default)]
    synctoken: Option<String>,
    #[serde(default)]
    md5: Option<String>,
    url: String,
    #[serde(rename = "deadline-ms", default)]
    deadline_ms: Option<u64>,
}

impl TryFrom<Value> for ChangeNotification {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let inline = value
            .as_object()
            .is_some_and(|o| o.contains_key("prefixes") || o.contains_key("ipv6_prefixes"));

        if inline {
            let doc = IpRangesDocument::from_value(value)?;
            return Ok(Self {
                create_time: doc.create_date.clone(),
                sync_token: Some(doc.sync_token.clone()),
                payload: SnapshotPayload::Inline(doc),
                deadline_ms: None,
            });
        }

        let msg: PointerMessage = serde_json::from_value(value)
            .map_err(|e| Error::invalid_input(format!("Unrecognized notification: {}", e)))?;
        let md5 = msg
            .md5
            .map(|d| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty() && d != SEED_DIGEST);

        Ok(Self {
            create_time: msg.create_time,
            sync_token: msg.synctoken,
            payload: SnapshotPayload::Pointer { url: msg.url, md5 },
            deadline_ms: msg.deadline_ms,
        })
    }
}

impl From<ChangeNotification> for Value {
    fn from(n: ChangeNotification) -> Self {
        match n.payload {
            SnapshotPayload::Inline(doc) => {
                serde_json::to_value(doc).unwrap_or(Value::Null)
            }
            SnapshotPayload::Pointer { url, md5 } => {
                let mut map = Map::new();
                map.insert("create-time".into(), Value::String(n.create_time));
                if let Some(token) = n.sync_token {
                    map.insert("synctoken".into(), Value::String(token));
                }
                map.insert(
                    "md5".into(),
                    Value::String(md5.unwrap_or_else(|| SEED_DIGEST.to_string())),
                );
                map.insert("url".into(), Value::String(url));
                if let Some(deadline_ms) = n.deadline_ms {
                    map.insert("deadline-ms".into(), Value::from(deadline_ms));
                }
                Value::Object(map)
            }
        }
    }
}

/// SNS delivery envelope
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnsEnvelope {
    pub records: Vec<SnsRecord>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnsRecord {
    #[serde(default)]
    pub event_source: Option<String>,
    pub sns: SnsMessage,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnsMessage {
    #[serde(default)]
    pub message_id: String,
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub topic_arn: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

/// What happened to one delivered record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Applied {
        message_id: String,
        report: ReconcileReport,
    },
    /// Logged and dropped; the next notification retries
    Dropped {
        message_id: String,
        kind: &'static str,
        reason: String,
    },
}

impl DeliveryOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, DeliveryOutcome::Applied { .. })
    }

    pub fn message_id(&self) -> &str {
        match self {
            DeliveryOutcome::Applied { message_id, .. } => message_id,
            DeliveryOutcome::Dropped { message_id, .. } => message_id,
        }
    }
}

/// Reconciliation entry point for change notifications
pub struct NotificationHandler {
    source: Arc<dyn IpRangeSource>,
    reconciler: Arc<Reconciler>,
    filter: RangeFilter,
}

impl NotificationHandler {
    pub fn new(
        source: Arc<dyn IpRangeSource>,
        reconciler: Arc<Reconciler>,
        filter: RangeFilter,
    ) -> Self {
        Self {
            source,
            reconciler,
            filter,
        }
    }

    /// Handle one notification, returning any error to the caller
    pub async fn handle(&self, notification: &ChangeNotification) -> Result<ReconcileReport> {
        self.handle_until(notification, None).await
    }

    /// Handle one notification with retries bounded by `deadline`
    ///
    /// A deadline carried by the notification itself applies as well; the
    /// earlier of the two wins.
    pub async fn handle_until(
        &self,
        notification: &ChangeNotification,
        deadline: Option<Instant>,
    ) -> Result<ReconcileReport> {
        let sender_deadline = notification.remaining().map(|r| Instant::now() + r);
        let deadline = match (deadline, sender_deadline) {
            (Some(local), Some(sender)) => Some(local.min(sender)),
            (local, sender) => local.or(sender),
        };
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::deadline(
                "deadline passed before reconciliation started",
            ));
        }

        let snapshot = self.snapshot(notification).await?;

        if let Some(announced) = &notification.sync_token {
            if announced != &snapshot.sync_token.to_string() {
                debug!(
                    "Notification announced syncToken {} but snapshot has {}",
                    announced, snapshot.sync_token
                );
            }
        }

        self.reconciler.reconcile_until(&snapshot, deadline).await
    }

    /// Handle every record of an envelope independently
    ///
    /// Failures are logged and dropped: there is no caller to report to, and
    /// the publisher's next notification retries.
    pub async fn handle_envelope(&self, envelope: &SnsEnvelope) -> Vec<DeliveryOutcome> {
        self.handle_envelope_until(envelope, None).await
    }

    /// Handle every record of an envelope, all within `deadline`
    ///
    /// Records still being retried when the deadline arrives are dropped as
    /// `DeadlineExceeded`.
    pub async fn handle_envelope_until(
        &self,
        envelope: &SnsEnvelope,
        deadline: Option<Instant>,
    ) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::with_capacity(envelope.records.len());

        for record in &envelope.records {
            let message_id = record.sns.message_id.clone();
            let result = match ChangeNotification::parse(&record.sns.message) {
                Ok(notification) => self.handle_until(&notification, deadline).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(report) => {
                    info!(
                        "Notification {} applied: +{} -{} size={}",
                        message_id, report.added, report.removed, report.final_size
                    );
                    outcomes.push(DeliveryOutcome::Applied { message_id, report });
                }
                Err(e) => {
                    error!(
                        "Dropping notification {} ({}): {}",
                        message_id,
                        e.kind(),
                        e
                    );
                    outcomes.push(DeliveryOutcome::Dropped {
                        message_id,
                        kind: e.kind(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        outcomes
    }

    async fn snapshot(&self, notification: &ChangeNotification) -> Result<IpRangeSnapshot> {
        match &notification.payload {
            SnapshotPayload::Inline(doc) => doc.select(&self.filter),
            SnapshotPayload::Pointer { url, md5 } => {
                let request = FetchRequest::new(url.clone(), self.filter.clone())
                    .with_md5(md5.clone());
                debug!(
                    "Fetching {} via {} (verify={})",
                    url,
                    self.source.source_name(),
                    md5.is_some()
                );
                self.source.fetch(&request).await
            }
        }
    }
}

/// Runs the reconciliation entry point in-process
pub struct LocalInvoker {
    handler: Arc<NotificationHandler>,
}

impl LocalInvoker {
    pub fn new(handler: Arc<NotificationHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl ReconcileInvoker for LocalInvoker {
    async fn invoke(
        &self,
        target: &str,
        notification: &ChangeNotification,
    ) -> Result<ReconcileReport> {
        debug!("Invoking reconciliation in-process (target {})", target);
        self.handler.handle(notification).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pointer_message() {
        let n = ChangeNotification::parse(
            r#"{"create-time":"2024-01-01-00-00-00","synctoken":"1704067200","md5":"ABCDEF","url":"https://example.com/ip-ranges.json"}"#,
        )
        .unwrap();

        assert_eq!(n.sync_token.as_deref(), Some("1704067200"));
        assert_eq!(
            n.payload,
            SnapshotPayload::Pointer {
                url: "https://example.com/ip-ranges.json".to_string(),
                md5: Some("abcdef".to_string()),
            }
        );
    }

    #[test]
    fn test_seed_digest_disables_verification() {
        let n = ChangeNotification::parse(
            r#"{"create-time":"Initial Seed","synctoken":"0123456789","md5":"seed","url":"https://example.com/x.json"}"#,
        )
        .unwrap();
        assert!(matches!(n.payload, SnapshotPayload::Pointer { md5: None, .. }));
    }

    #[test]
    fn test_seed_serializes_to_publisher_format() {
        let value = serde_json::to_value(ChangeNotification::seed("https://example.com/x.json")).unwrap();
        assert_eq!(value["md5"], "seed");
        assert_eq!(value["url"], "https://example.com/x.json");

        let back: ChangeNotification = serde_json::from_value(value).unwrap();
        assert_eq!(back, ChangeNotification::seed("https://example.com/x.json"));
    }

    #[test]
    fn test_deadline_travels_with_the_pointer() {
        let deadline = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        let n = ChangeNotification::seed("https://example.com/x.json").with_deadline(deadline);

        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["deadline-ms"], 1_700_000_000_123u64);

        let back: ChangeNotification = serde_json::from_value(value).unwrap();
        assert_eq!(back.deadline_ms, Some(1_700_000_000_123));
        assert_eq!(back.remaining(), Some(Duration::ZERO));

        let open = ChangeNotification::seed("https://example.com/x.json");
        assert_eq!(open.remaining(), None);
        assert!(serde_json::to_value(&open).unwrap().get("deadline-ms").is_none());
    }

    #[test]
    fn test_inline_document() {
        let n = ChangeNotification::parse(
            r#"{"syncToken":"5","createDate":"2024-01-01-00-00-00","prefixes":[{"ip_prefix":"1.2.3.0/24","region":"GLOBAL","service":"CLOUDFRONT"}]}"#,
        )
        .unwrap();
        assert_eq!(n.sync_token.as_deref(), Some("5"));
        assert!(matches!(n.payload, SnapshotPayload::Inline(_)));
    }

    #[test]
    fn test_garbage_is_invalid_input() {
        assert!(matches!(
            ChangeNotification::parse("not json"),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            ChangeNotification::parse(r#"{"hello":"world"}"#),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_envelope_shape() {
        let envelope: SnsEnvelope = serde_json::from_str(
            r#"{"Records":[{"EventSource":"aws:sns","EventVersion":"1.0","Sns":{"MessageId":"m-1","Message":"{}","Timestamp":"2024-01-01T00:00:00Z","Type":"Notification"}}]}"#,
        )
        .unwrap();
        assert_eq!(envelope.records.len(), 1);
        assert_eq!(envelope.records[0].sns.message_id, "m-1");
    }
}
