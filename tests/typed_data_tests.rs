//! Typed Data Tests: signature sessions and pending request handles
//!
//! These tests verify:
//! 1. Signed is terminal and events carry the payload being signed
//! 2. retry() is repeatable and never re-signs finished indices
//! 3. request() resolves across retries; replace / cancel / clear reject it
//! 4. Late results from a superseded session are dropped

mod common;

use beesign::{
    FailureKind, HardwareSessionGate, ItemStatus, QueueError, SessionStatus, SignResult, SignStage, SignerKind, SignerSet,
    TypedDataSigningStore, HARDWARE_USER_CANCELLED,
};
use common::*;
use std::sync::Arc;
use tokio::sync::oneshot;

fn store_with(signer: Arc<ScriptedSigner>) -> TypedDataSigningStore { TypedDataSigningStore::new(SignerSet::new().with(signer)) }

async fn wait_failed(store: &TypedDataSigningStore) {
    let mut rx = store.subscribe();
    rx.wait_for(|s| s.status.is_failed()).await.expect("store alive");
}

/// Test: every item ends Signed, events carry payload and signature
#[tokio::test]
async fn typed_batch_signs_in_order() {
    let signer = Arc::new(ScriptedSigner::remote(vec![ok("0xs1"), ok("0xs2")]));
    let store = store_with(signer.clone());
    let mut events = store.events();

    store.init(vec![typed("Mail"), typed("Order")], remote_account());
    let results = store.start(false).await.expect("batch");
    assert_eq!(results, vec![SignResult::new("0xs1"), SignResult::new("0xs2")]);

    let session = store.session();
    assert!(session.items.iter().all(|i| i.status == ItemStatus::Signed));
    assert_eq!(session.status, SessionStatus::Completed);
    // Finished runs drop their context
    assert!(store.run_context().is_none());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    let stages: Vec<(usize, SignStage)> = seen.iter().map(|e| (e.index, e.stage)).collect();
    assert_eq!(
        stages,
        vec![
            (0, SignStage::Building),
            (0, SignStage::Built),
            (0, SignStage::Signed),
            (1, SignStage::Building),
            (1, SignStage::Built),
            (1, SignStage::Signed),
        ]
    );
    assert_eq!(seen[2].hash.as_deref(), Some("0xs1"));
    assert_eq!(seen[5].item.primary_type(), Some("Order"));
    assert!(seen.iter().all(|e| e.total == 2));
}

/// Test: two independent failures, two retries, each index signed once
#[tokio::test]
async fn retry_is_repeatable_without_resigning() {
    let signer = Arc::new(ScriptedSigner::remote(vec![
        ok("0xs1"),
        Step::Err(rpc_error("session timeout")),
        ok("0xs2"),
        Step::Err(rpc_error("session timeout")),
        ok("0xs3"),
    ]));
    let store = store_with(signer.clone());

    store.init(vec![typed("A"), typed("B"), typed("C")], remote_account());
    assert!(store.start(false).await.is_err());
    assert_eq!(store.run_context().expect("context").current_index, 1);

    assert!(store.retry().await.is_err());
    let ctx = store.run_context().expect("context");
    assert_eq!(ctx.current_index, 2);
    assert_eq!(ctx.results, vec![SignResult::new("0xs1"), SignResult::new("0xs2")]);

    let results = store.retry().await.expect("second retry");
    assert_eq!(results, vec![SignResult::new("0xs1"), SignResult::new("0xs2"), SignResult::new("0xs3")]);

    let primaries: Vec<String> = signer
        .calls()
        .iter()
        .filter_map(|p| match p {
            beesign::Payload::TypedData(t) => t.primary_type().map(String::from),
            _ => None,
        })
        .collect();
    assert_eq!(primaries, vec!["A", "B", "B", "C", "C"]);
}

/// Test: typed-data retries never mutate the payload
#[tokio::test]
async fn typed_retry_resends_same_payload() {
    let signer = Arc::new(ScriptedSigner::remote(vec![Step::Err(rpc_error("nonce too low")), ok("0xs1")]));
    let store = store_with(signer.clone());

    store.init(vec![typed("A")], remote_account());
    assert!(store.start(false).await.is_err());
    store.retry().await.expect("retry");
    let calls = signer.calls();
    assert_eq!(calls[0], calls[1]);
}

/// Test: request() resolves with every signature once retries finish the batch
#[tokio::test]
async fn request_resolves_across_retry() {
    let signer = Arc::new(ScriptedSigner::remote(vec![ok("0xs1"), Step::Err(rpc_error("relay closed"))]));
    let store = Arc::new(store_with(signer.clone()));

    let pending = store.request(vec![typed("A"), typed("B")], remote_account()).expect("request");
    assert_eq!(pending.session(), store.session_id());
    wait_failed(&store).await;
    assert!(store.has_pending());

    signer.push(ok("0xs2"));
    store.retry().await.expect("retry");
    assert_eq!(pending.await, Ok(vec![SignResult::new("0xs1"), SignResult::new("0xs2")]));
    assert!(!store.has_pending());
}

/// Test: empty batch is rejected up front
#[tokio::test]
async fn empty_request_is_rejected() {
    let store = Arc::new(store_with(Arc::new(ScriptedSigner::remote(vec![]))));
    let err = store.request(vec![], remote_account()).unwrap_err();
    assert_eq!(err, QueueError::EmptyBatch);
    assert_eq!(err.to_string(), "No typed data payloads to sign");
}

/// Test: a new request rejects the previous handle
#[tokio::test]
async fn new_request_replaces_pending_one() {
    let (_release, hold) = oneshot::channel();
    let signer = Arc::new(ScriptedSigner::remote(vec![Step::Hold(hold), ok("0xs9")]));
    let store = Arc::new(store_with(signer.clone()));

    let first = store.request(vec![typed("A")], remote_account()).expect("first");
    signer.entered.notified().await;

    let second = store.request(vec![typed("B")], remote_account()).expect("second");
    assert_eq!(first.await, Err(QueueError::Replaced));
    assert_eq!(QueueError::Replaced.to_string(), "Replaced by new request");
    assert_eq!(second.await, Ok(vec![SignResult::new("0xs9")]));
}

/// Test: cancel rejects the handle with the reason and resets the store
#[tokio::test]
async fn cancel_rejects_pending_and_resets() {
    let signer = Arc::new(ScriptedSigner::remote(vec![Step::Err(rpc_error("relay closed"))]));
    let store = Arc::new(store_with(signer.clone()));

    let pending = store.request(vec![typed("A")], remote_account()).expect("request");
    wait_failed(&store).await;

    store.cancel(Some("User closed the sheet".into()));
    assert_eq!(pending.await, Err(QueueError::Cancelled("User closed the sheet".into())));
    assert!(store.run_context().is_none());
    assert_eq!(store.status(), SessionStatus::Idle);
    assert_eq!(store.retry().await, Err(QueueError::NotFailed));
}

/// Test: dismissed connect prompt keeps the request open; cancel without a reason uses the failure
#[tokio::test]
async fn hardware_dismissal_then_cancel() {
    let signer = Arc::new(ScriptedSigner::new(SignerKind::Hardware, vec![ok("0xsig")]));
    let bridge = Arc::new(MockBridge::dismissed());
    let store = Arc::new(store_with(signer.clone()).with_gate(HardwareSessionGate::new(bridge.clone())));

    let pending = store.request(vec![typed("Agent")], ledger_account()).expect("request");
    wait_failed(&store).await;

    assert_eq!(signer.call_count(), 0);
    let error = store.error().expect("error");
    assert_eq!(error.status, FailureKind::Rejected);
    assert_eq!(error.content, "Signature rejected");
    assert!(store.has_pending());

    store.cancel(None);
    assert_eq!(pending.await, Err(QueueError::Cancelled(HARDWARE_USER_CANCELLED.into())));
}

/// Test: dismissed prompt, then the user connects and retries
#[tokio::test]
async fn hardware_dismissal_then_retry() {
    let signer = Arc::new(ScriptedSigner::new(SignerKind::Hardware, vec![ok("0xsig")]));
    let bridge = Arc::new(MockBridge::dismissed());
    let store = Arc::new(store_with(signer.clone()).with_gate(HardwareSessionGate::new(bridge.clone())));

    let pending = store.request(vec![typed("Agent")], ledger_account()).expect("request");
    wait_failed(&store).await;

    // Second prompt connects
    store.retry().await.expect("retry");
    assert_eq!(bridge.prompt_count(), 2);
    assert_eq!(pending.await, Ok(vec![SignResult::new("0xsig")]));
}

/// Test: clear drops the handle
#[tokio::test]
async fn clear_drops_pending_request() {
    let signer = Arc::new(ScriptedSigner::remote(vec![Step::Err(rpc_error("relay closed"))]));
    let store = Arc::new(store_with(signer));

    let pending = store.request(vec![typed("A")], remote_account()).expect("request");
    wait_failed(&store).await;
    store.clear();
    assert!(matches!(pending.await, Err(QueueError::Cancelled(_))));
}

/// Test: late signature for a superseded session is dropped
#[tokio::test]
async fn stale_signature_is_dropped() {
    let (release, hold) = oneshot::channel();
    let signer = Arc::new(ScriptedSigner::remote(vec![Step::Hold(hold)]));
    let store = Arc::new(store_with(signer.clone()));

    let old = store.init(vec![typed("A")], remote_account());
    let running = {
        let store = store.clone();
        tokio::spawn(async move { store.start(false).await })
    };
    signer.entered.notified().await;

    let new = store.init(vec![typed("B")], remote_account());
    release.send(Ok("0xstale".to_string())).expect("signer waiting");
    assert_eq!(running.await.expect("task"), Err(QueueError::Superseded(old)));

    let session = store.session();
    assert_eq!(session.id, new);
    assert_eq!(session.items[0].status, ItemStatus::Idle);
    assert!(store.run_context().expect("context").results.is_empty());
}

/// Test: start without init has no run context
#[tokio::test]
async fn start_without_context_fails() {
    let store = store_with(Arc::new(ScriptedSigner::remote(vec![])));
    assert_eq!(store.start(false).await, Err(QueueError::NoRunContext));
}

/// Test: start() while a request is signing is refused; the item is signed once
#[tokio::test]
async fn start_during_request_is_refused() {
    let (release, hold) = oneshot::channel();
    let signer = Arc::new(ScriptedSigner::remote(vec![Step::Hold(hold), ok("0xsecond")]));
    let store = Arc::new(store_with(signer.clone()));

    let pending = store.request(vec![typed("A")], remote_account()).expect("request");
    // Refused even before the background run reaches the signer
    assert_eq!(store.start(false).await, Err(QueueError::AlreadyRunning));
    signer.entered.notified().await;
    assert_eq!(store.start(true).await, Err(QueueError::AlreadyRunning));
    assert_eq!(store.retry().await, Err(QueueError::NotFailed));
    assert_eq!(signer.call_count(), 1);

    release.send(Ok("0xfirst".to_string())).expect("signer waiting");
    assert_eq!(pending.await, Ok(vec![SignResult::new("0xfirst")]));
    assert_eq!(signer.call_count(), 1);
}

/// Test: configured connect timeout fails a silent prompt, retry stays available
#[tokio::test]
async fn configured_connect_timeout_applies_to_store() {
    let config = beesign::OrchestratorConfig::default().with_connect_timeout(std::time::Duration::from_secs(1));
    let signer = Arc::new(ScriptedSigner::new(SignerKind::Hardware, vec![]));
    let store = store_with(signer.clone()).with_config(&config).with_gate(HardwareSessionGate::new(Arc::new(MockBridge::silent())));

    store.init(vec![typed("Agent")], ledger_account());
    let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), store.start(false)).await.expect("prompt must time out");
    assert!(matches!(outcome, Err(QueueError::Sign(beesign::SignError::Timeout(_)))));
    assert_eq!(store.error().expect("error").status, FailureKind::Errored);
    assert_eq!(signer.call_count(), 0);
}
