//! Architectural Contract Test: Suspected Empty Updates
//!
//! This test verifies that an empty filtered target never wipes a populated
//! IP set, on either trigger path.
//!
//! Constraints verified:
//! - Reconciler returns SuspectedEmptyUpdate and performs no mutation
//! - The notification path logs and drops the delivery
//! - The seeding path reports FAILED (an empty seed is not a seed)
//!
//! If this test fails, an upstream outage can silently rewrite the firewall.

mod common;

use common::*;
use ipsync_core::error::Error;
use ipsync_core::lifecycle::{LifecycleGateway, LifecycleStatus, Seeder};
use ipsync_core::notification::{DeliveryOutcome, LocalInvoker, NotificationHandler, SnsEnvelope};
use ipsync_core::{LifecycleEvent, RangeFilter, ReconcileEvent, Reconciler};
use std::sync::Arc;

#[tokio::test]
async fn empty_target_leaves_set_untouched() {
    // current = {1.2.3.0/24}, target = {}
    let store = ScriptedIpSetStore::new(&["1.2.3.0/24"]);
    let (reconciler, mut events) = Reconciler::new(
        Arc::new(ScriptedIpSetStore::sharing_state_with(&store)),
        fast_config(),
    )
    .with_events();

    let err = reconciler
        .reconcile(&snapshot(9, &[]))
        .await
        .expect_err("empty target must be refused");

    assert!(matches!(err, Error::SuspectedEmptyUpdate { current: 1 }));
    assert_eq!(store.mutation_calls(), 0);
    assert_eq!(store.members().await, members(&["1.2.3.0/24"]));

    let mut rejected = false;
    while let Ok(event) = events.try_recv() {
        rejected |= matches!(event, ReconcileEvent::Rejected { .. });
    }
    assert!(rejected, "a Rejected event is emitted for guards");
}

#[tokio::test]
async fn filter_that_selects_nothing_counts_as_empty() {
    // The publisher still lists ranges, just none for this family
    let store = ScriptedIpSetStore::new(&["1.2.3.0/24"]);
    let reconciler = Reconciler::new(
        Arc::new(ScriptedIpSetStore::sharing_state_with(&store)),
        fast_config(),
    );

    let err = reconciler
        .reconcile(&snapshot(9, &["2600:9000::/28"]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "SuspectedEmptyUpdate");
    assert_eq!(store.members().await, members(&["1.2.3.0/24"]));
}

#[tokio::test]
async fn notification_path_drops_empty_update() {
    let store = ScriptedIpSetStore::new(&["1.2.3.0/24"]);
    let handler = NotificationHandler::new(
        Arc::new(StaticRangeSource::new(snapshot(9, &[]))),
        Arc::new(Reconciler::new(
            Arc::new(ScriptedIpSetStore::sharing_state_with(&store)),
            fast_config(),
        )),
        RangeFilter::default(),
    );
    let envelope: SnsEnvelope = serde_json::from_value(serde_json::json!({
        "Records": [{
            "EventSource": "aws:sns",
            "Sns": {
                "MessageId": "m-1",
                "Message": r#"{"create-time":"now","synctoken":"9","md5":"abc","url":"https://example.com/x.json"}"#
            }
        }]
    }))
    .unwrap();

    let outcomes = handler.handle_envelope(&envelope).await;

    assert_eq!(outcomes.len(), 1);
    assert!(matches!(
        &outcomes[0],
        DeliveryOutcome::Dropped { kind: "SuspectedEmptyUpdate", .. }
    ));
    assert_eq!(store.members().await, members(&["1.2.3.0/24"]));
}

#[tokio::test]
async fn seeding_into_nothing_fails() {
    // Empty set and empty target: the reconciler has nothing to refuse,
    // but a seed that leaves the set empty is still a failed seed.
    let store = ScriptedIpSetStore::new(&[]);
    let handler = Arc::new(NotificationHandler::new(
        Arc::new(StaticRangeSource::new(snapshot(9, &[]))),
        Arc::new(Reconciler::new(
            Arc::new(ScriptedIpSetStore::sharing_state_with(&store)),
            fast_config(),
        )),
        RangeFilter::default(),
    ));
    let seeder = Arc::new(Seeder::new(
        Arc::new(LocalInvoker::new(handler)),
        "https://example.com/ip-ranges.json",
    ));
    let sink = RecordingSink::new();
    let gateway = LifecycleGateway::new(
        seeder,
        Arc::new(RecordingSink::sharing_counters_with(&sink)),
        Default::default(),
    );

    let event: LifecycleEvent = serde_json::from_value(serde_json::json!({
        "RequestType": "Create",
        "RequestId": "r-1",
        "ResponseURL": "https://cfn.example/r-1",
        "StackId": "stack",
        "LogicalResourceId": "Seed",
        "ResourceProperties": { "LambdaARN": "arn:aws:lambda:us-east-1:1:function:update" }
    }))
    .unwrap();

    let response = gateway.handle(event, None).await.unwrap();

    assert_eq!(response.status, LifecycleStatus::Failed);
    assert!(response.reason.contains("empty"));
    assert_eq!(sink.delivered().len(), 1);
}
