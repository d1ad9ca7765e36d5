//! Lambda invoker
//!
//! Runs the reconciliation entry point through the Lambda `Invoke` API with
//! `RequestResponse`, so the Seeder learns the outcome before it answers
//! the lifecycle request.

use async_trait::async_trait;
use aws_sdk_lambda::Client;
use aws_sdk_lambda::error::DisplayErrorContext;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::InvocationType;
use ipsync_core::notification::ChangeNotification;
use ipsync_core::reconciler::ReconcileReport;
use ipsync_core::traits::ReconcileInvoker;
use ipsync_core::{Error, Result};
use serde::Deserialize;

pub struct LambdaInvoker {
    client: Client,
}

impl LambdaInvoker {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Error body written by the runtime when the function fails
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FunctionError {
    #[serde(default)]
    error_type: String,
    #[serde(default)]
    error_message: String,
}

/// Rebuild an error reported by the invoked function
///
/// The function reports `Error::kind()` as its error type and the error's
/// display text as its message. Counted variants get their numbers back from
/// that text; anything unrecognized becomes an invocation error.
pub fn remote_error(error_type: &str, message: &str) -> Error {
    let counts = numbers(message);

    let rebuilt = match (error_type, counts.as_slice()) {
        ("UpstreamFetchError", _) => Some(unprefixed(Error::UpstreamFetch, message)),
        ("RateLimited", _) => Some(unprefixed(Error::RateLimited, message)),
        ("Conflict", _) => Some(unprefixed(Error::Conflict, message)),
        ("DeadlineExceeded", _) => Some(unprefixed(Error::DeadlineExceeded, message)),
        ("StoreError", _) => Some(unprefixed(Error::Store, message)),
        ("InvalidInput", _) => Some(unprefixed(Error::InvalidInput, message)),
        ("ConfigError", _) => Some(unprefixed(Error::Config, message)),
        ("SuspectedEmptyUpdate", [.., current]) => Some(Error::SuspectedEmptyUpdate {
            current: *current as usize,
        }),
        ("CapacityExceeded", [required, capacity]) => Some(Error::CapacityExceeded {
            required: *required as usize,
            capacity: *capacity as usize,
        }),
        ("MutationCeilingExceeded", [attempted, limit]) => Some(Error::MutationCeilingExceeded {
            attempted: *attempted as usize,
            limit: *limit as usize,
        }),
        ("StaleSnapshot", [snapshot, applied]) => Some(Error::StaleSnapshot {
            snapshot: *snapshot,
            applied: *applied,
        }),
        _ => None,
    };

    rebuilt.unwrap_or_else(|| Error::invocation(format!("{}: {}", error_type, message)))
}

/// Wrap `message` in a variant, dropping the variant's own display prefix
fn unprefixed(wrap: fn(String) -> Error, message: &str) -> Error {
    let prefix = wrap(String::new()).to_string();
    let body = message.strip_prefix(prefix.as_str()).unwrap_or(message);
    wrap(body.to_string())
}

/// Decimal numbers in `message`, in order
fn numbers(message: &str) -> Vec<u64> {
    message
        .split(|c: char| !c.is_ascii_digit())
        .filter_map(|run| run.parse().ok())
        .collect()
}

/// Turn an `Invoke` result into a report or an error
pub fn decode_response(function_error: Option<&str>, payload: &[u8]) -> Result<ReconcileReport> {
    if let Some(kind) = function_error {
        return Err(match serde_json::from_slice::<FunctionError>(payload) {
            Ok(body) if !body.error_type.is_empty() => {
                remote_error(&body.error_type, &body.error_message)
            }
            _ => Error::invocation(format!(
                "{} error: {}",
                kind,
                String::from_utf8_lossy(payload)
            )),
        });
    }

    serde_json::from_slice(payload).map_err(|e| {
        Error::invocation(format!(
            "Unexpected response from reconciliation function: {} ({})",
            e,
            String::from_utf8_lossy(payload)
        ))
    })
}

#[async_trait]
impl ReconcileInvoker for LambdaInvoker {
    async fn invoke(
        &self,
        target: &str,
        notification: &ChangeNotification,
    ) -> Result<ReconcileReport> {
        let payload = serde_json::to_vec(notification)?;
        tracing::info!("Invoking {} with {}", target, String::from_utf8_lossy(&payload));

        let output = self
            .client
            .invoke()
            .function_name(target)
            .invocation_type(InvocationType::RequestResponse)
            .payload(Blob::new(payload))
            .send()
            .await
            .map_err(|e| {
                Error::invocation(format!("Invoke {} failed: {}", target, DisplayErrorContext(&e)))
            })?;

        let body: &[u8] = output.payload().map(|b| b.as_ref()).unwrap_or_default();
        decode_response(output.function_error(), body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipsync_core::SyncToken;
    use serde_json::json;

    #[test]
    fn test_decode_report() {
        let payload = json!({
            "added": 3,
            "removed": 1,
            "final_size": 120,
            "batches": 2,
            "sync_token": 1700000000u64
        })
        .to_string();

        let report = decode_response(None, payload.as_bytes()).unwrap();
        assert_eq!(report.added, 3);
        assert_eq!(report.final_size, 120);
        assert_eq!(report.sync_token, SyncToken(1_700_000_000));
    }

    #[test]
    fn test_decode_function_error() {
        let payload = json!({
            "errorType": "UpstreamFetchError",
            "errorMessage": "Upstream fetch error: MD5 Mismatch"
        })
        .to_string();

        let err = decode_response(Some("Unhandled"), payload.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::UpstreamFetch(ref m) if m == "MD5 Mismatch"));
    }

    #[test]
    fn test_counted_errors_keep_their_class() {
        let remote = [
            Error::SuspectedEmptyUpdate { current: 118 },
            Error::CapacityExceeded {
                required: 12000,
                capacity: 10000,
            },
            Error::MutationCeilingExceeded {
                attempted: 1000,
                limit: 500,
            },
            Error::StaleSnapshot {
                snapshot: 1_700_000_000,
                applied: 1_700_000_600,
            },
        ];

        for original in remote {
            let rebuilt = remote_error(original.kind(), &original.to_string());
            assert_eq!(rebuilt.kind(), original.kind());
            assert_eq!(rebuilt.to_string(), original.to_string());
        }
    }

    #[test]
    fn test_message_errors_round_trip_without_doubling() {
        let original = Error::rate_limited("WAFInternalErrorException");
        let rebuilt = remote_error(original.kind(), &original.to_string());
        assert_eq!(rebuilt.to_string(), "Rate limited: WAFInternalErrorException");
    }

    #[test]
    fn test_decode_unknown_error_type() {
        let payload = json!({
            "errorType": "Runtime.ExitError",
            "errorMessage": "exit status 2"
        })
        .to_string();

        let err = decode_response(Some("Unhandled"), payload.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Invocation(ref m) if m.starts_with("Runtime.ExitError")));

        let err = decode_response(Some("Unhandled"), b"Task timed out").unwrap_err();
        assert!(matches!(err, Error::Invocation(ref m) if m.contains("Task timed out")));
    }

    #[test]
    fn test_decode_garbage() {
        let err = decode_response(None, b"null").unwrap_err();
        assert_eq!(err.kind(), "InvocationError");
    }
}
