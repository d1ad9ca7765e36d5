// # Reconcile Invoker Trait
//
// Runs the reconciliation entry point on behalf of the Seeder.
//
// ## Implementations
//
// - In-process: `LocalInvoker` (wraps a `NotificationHandler`)
// - AWS Lambda `Invoke` (RequestResponse): `ipsync-lambda` crate

use async_trait::async_trait;

use crate::notification::ChangeNotification;
use crate::reconciler::ReconcileReport;

/// Trait for invoking the reconciliation entry point synchronously
///
/// The seeding identity is only allowed to invoke `target`; everything that
/// touches the firewall happens behind it.
#[async_trait]
pub trait ReconcileInvoker: Send + Sync {
    /// Invoke `target` with a notification and wait for its report
    async fn invoke(
        &self,
        target: &str,
        notification: &ChangeNotification,
    ) -> Result<ReconcileReport, crate::Error>;
}
