// # Callback Sink Trait
//
// Delivers the terminal lifecycle response to the provisioning system.
//
// ## Implementations
//
// - HTTP PUT to the pre-signed response URL: `ipsync-lambda` crate
// - Tests: recording sinks in `tests/common`

use async_trait::async_trait;

use crate::lifecycle::LifecycleResponse;

/// Trait for lifecycle callback delivery
///
/// A failed delivery must be reported as `Error::CallbackDelivery`. There is
/// no safe local recovery: the provisioning system waits until its own
/// timeout when no response arrives.
#[async_trait]
pub trait CallbackSink: Send + Sync {
    async fn deliver(
        &self,
        response_url: &str,
        response: &LifecycleResponse,
    ) -> Result<(), crate::Error>;
}
