//! End-to-end engine scenarios against in-memory collaborators

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use setupflow::models::{
    DecisionRequest, DecisionSource, SessionState, SetupKind, TimeoutPolicy,
};
use setupflow::services::{MarketDataError, NotificationError, StaticMarketData};
use setupflow::store::CheckpointStore;
use setupflow::workflow::{ApprovalError, WorkflowError};

use crate::test_utils::{
    build_engine, ccc_bars, fixture_market, instruments, redeliver_until_refused, test_config,
    wait_for, wait_for_pending, wait_for_state, wait_for_terminal, CountingMarketData, FlakyStore,
    RecordingSink, RecordingStore, StallingMarketData,
};

#[tokio::test]
async fn empty_scan_is_rejected() {
    let engine = build_engine(
        test_config(),
        Arc::new(StaticMarketData::new()),
        Arc::new(RecordingStore::new()),
        RecordingSink::new(),
    );
    assert!(matches!(
        engine.start_scan(Vec::new()).await,
        Err(WorkflowError::EmptyInstrumentSet)
    ));
}

#[tokio::test]
async fn reversal_below_threshold_completes_without_approval() {
    let store = RecordingStore::new();
    let sink = RecordingSink::new();
    let engine = build_engine(
        test_config(),
        Arc::new(fixture_market().await),
        Arc::new(store.clone()),
        sink.clone(),
    );

    let id = engine.start_scan(instruments(&["AAA"])).await.unwrap();
    let session = wait_for_terminal(&engine, &id).await;

    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.setups.len(), 1);
    assert_eq!(session.setups[0].kind, SetupKind::ReversalPattern);
    assert_eq!(session.setups[0].stop, 100.0);
    assert_eq!(session.setups[0].target, 102.0);
    assert!(session.pending.is_empty());
    assert_eq!(session.discarded.len(), 1);
    assert!(sink.delivered().is_empty());
    assert_eq!(
        store.states(&id),
        vec![
            SessionState::Scanning,
            SessionState::Analyzing,
            SessionState::RiskAssessing,
            SessionState::Completed,
        ]
    );
}

#[tokio::test]
async fn failing_instruments_do_not_abort_the_session() {
    let market = fixture_market().await;
    let engine = build_engine(
        test_config(),
        Arc::new(market.clone()),
        Arc::new(RecordingStore::new()),
        RecordingSink::new(),
    );

    let id = engine
        .start_scan(instruments(&["AAA", "BBB", "CCC", "NOPE"]))
        .await
        .unwrap();
    let session = wait_for_pending(&engine, &id).await;

    assert_eq!(session.results.len(), 4);
    assert_eq!(session.failed_instruments(), 2);
    let bbb = session
        .results
        .iter()
        .find(|r| r.instrument.symbol == "BBB")
        .unwrap();
    assert_eq!(bbb.attempts, 3);
    assert_eq!(market.calls("BBB").await, 3);
    assert_eq!(session.pending.len(), 1);
    assert_eq!(session.pending[0].symbol, "CCC");
}

#[tokio::test]
async fn all_instruments_failing_still_completes() {
    let market = StaticMarketData::new();
    for symbol in ["AAA", "BBB"] {
        market
            .fail_times(symbol, MarketDataError::Transient("reset".to_string()), 10)
            .await;
    }
    let engine = build_engine(
        test_config(),
        Arc::new(market),
        Arc::new(RecordingStore::new()),
        RecordingSink::new(),
    );

    let id = engine.start_scan(instruments(&["AAA", "BBB"])).await.unwrap();
    let session = wait_for_terminal(&engine, &id).await;

    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.failed_instruments(), 2);
    assert!(session.setups.is_empty());
    assert!(session.reason.unwrap().contains("no setups detected"));
}

#[tokio::test]
async fn approval_leads_to_delivery() {
    let store = RecordingStore::new();
    let sink = RecordingSink::new();
    let engine = build_engine(
        test_config(),
        Arc::new(fixture_market().await),
        Arc::new(store.clone()),
        sink.clone(),
    );

    let id = engine
        .start_scan(instruments(&["AAA", "CCC", "EEE"]))
        .await
        .unwrap();
    let session = wait_for_pending(&engine, &id).await;
    assert_eq!(session.pending.len(), 2);
    assert_eq!(engine.pending_setups(&id).await.unwrap().len(), 2);

    let chosen = session
        .pending
        .iter()
        .find(|s| s.symbol == "CCC")
        .unwrap()
        .id
        .clone();
    let decision = engine
        .submit_decision(&id, DecisionRequest::approve([chosen.clone()]))
        .await
        .unwrap();
    assert_eq!(decision.source, DecisionSource::Human);
    assert_eq!(decision.rejected.len(), 1);

    let session = wait_for_terminal(&engine, &id).await;
    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.approved.len(), 1);
    assert!(session.is_delivered(&chosen));

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].setup_id, chosen);
    assert_eq!(delivered[0].symbol, "CCC");

    let states = store.states(&id);
    assert!(states.contains(&SessionState::PendingApproval));
    assert!(states.contains(&SessionState::Alerting));
    assert_eq!(states.last(), Some(&SessionState::Completed));
}

#[tokio::test]
async fn zero_timeout_rejects_by_default() {
    let sink = RecordingSink::new();
    let config = test_config().with_approval_timeout(Duration::ZERO, TimeoutPolicy::Reject);
    let engine = build_engine(
        config,
        Arc::new(fixture_market().await),
        Arc::new(RecordingStore::new()),
        sink.clone(),
    );

    let id = engine.start_scan(instruments(&["CCC"])).await.unwrap();
    let session = wait_for_terminal(&engine, &id).await;

    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.decisions.len(), 1);
    assert_eq!(session.decisions[0].source, DecisionSource::TimeoutDefault);
    assert!(session.approved.is_empty());
    assert!(session.deliveries.is_empty());
    assert!(sink.delivered().is_empty());
}

#[tokio::test]
async fn timeout_can_approve_by_policy() {
    let sink = RecordingSink::new();
    let config = test_config().with_approval_timeout(Duration::ZERO, TimeoutPolicy::Approve);
    let engine = build_engine(
        config,
        Arc::new(fixture_market().await),
        Arc::new(RecordingStore::new()),
        sink.clone(),
    );

    let id = engine.start_scan(instruments(&["CCC"])).await.unwrap();
    let session = wait_for_terminal(&engine, &id).await;

    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.approved.len(), 1);
    assert_eq!(sink.delivered().len(), 1);
}

#[tokio::test]
async fn decision_for_resolved_session_is_stale() {
    let store = RecordingStore::new();
    let engine = build_engine(
        test_config(),
        Arc::new(fixture_market().await),
        Arc::new(store.clone()),
        RecordingSink::new(),
    );

    let id = engine.start_scan(instruments(&["AAA"])).await.unwrap();
    let before = wait_for_terminal(&engine, &id).await;

    let result = engine
        .submit_decision(&id, DecisionRequest::reject_all())
        .await;
    assert!(matches!(
        result,
        Err(WorkflowError::Approval(ApprovalError::StaleDecision(_)))
    ));

    let after = engine.session(&id).await.unwrap();
    assert_eq!(after.revision, before.revision);
    assert_eq!(after.state, SessionState::Completed);
}

#[tokio::test]
async fn second_decision_is_stale() {
    let engine = build_engine(
        test_config(),
        Arc::new(fixture_market().await),
        Arc::new(RecordingStore::new()),
        RecordingSink::new(),
    );

    let id = engine.start_scan(instruments(&["CCC"])).await.unwrap();
    let session = wait_for_pending(&engine, &id).await;

    engine
        .submit_decision(&id, DecisionRequest::approve(session.pending_ids()))
        .await
        .unwrap();
    let second = engine
        .submit_decision(&id, DecisionRequest::reject_all())
        .await;
    assert!(matches!(
        second,
        Err(WorkflowError::Approval(ApprovalError::StaleDecision(_)))
    ));

    let session = wait_for_terminal(&engine, &id).await;
    assert_eq!(session.decisions.len(), 1);
    assert_eq!(session.approved.len(), 1);

    // The gate lets go of archived sessions; the checkpoint still marks a
    // late decision as stale.
    assert!(!engine.gate().is_resolved(&id).await);
    assert!(!engine.gate().is_pending(&id).await);
    let late = engine.submit_decision(&id, DecisionRequest::reject_all()).await;
    assert!(matches!(
        late,
        Err(WorkflowError::Approval(ApprovalError::StaleDecision(_)))
    ));
}

#[tokio::test]
async fn unreachable_sink_leaves_session_alerting_until_redelivered() {
    let sink = RecordingSink::down();
    let engine = build_engine(
        test_config(),
        Arc::new(fixture_market().await),
        Arc::new(RecordingStore::new()),
        sink.clone(),
    );

    let id = engine.start_scan(instruments(&["CCC"])).await.unwrap();
    let session = wait_for_pending(&engine, &id).await;
    engine
        .submit_decision(&id, DecisionRequest::approve(session.pending_ids()))
        .await
        .unwrap();

    let stuck = wait_for(&engine, &id, |s| {
        s.state == SessionState::Alerting && s.delivery_failure.is_some()
    })
    .await;
    assert_eq!(stuck.deliveries.len(), 1);
    assert!(!stuck.deliveries[0].delivered);
    assert_eq!(stuck.deliveries[0].attempts, 3);
    assert_eq!(sink.attempts(), 3);

    sink.set_down(false);
    // The suspended driver may still be releasing the session; redeliver is
    // a no-op until it has.
    let mut session = stuck;
    for _ in 0..100 {
        let _ = engine.redeliver(&id).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        session = engine.session(&id).await.unwrap();
        if session.state.is_terminal() {
            break;
        }
    }
    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.delivery_rounds, 2);
    assert!(session.delivery_failure.is_none());
    assert_eq!(sink.delivered().len(), 1);
}

#[tokio::test]
async fn rejected_alert_is_not_retried() {
    let sink = RecordingSink::new();
    sink.fail_next(NotificationError::Rejected("HTTP 400".to_string()));
    let engine = build_engine(
        test_config(),
        Arc::new(fixture_market().await),
        Arc::new(RecordingStore::new()),
        sink.clone(),
    );

    let id = engine.start_scan(instruments(&["CCC"])).await.unwrap();
    let session = wait_for_pending(&engine, &id).await;
    engine
        .submit_decision(&id, DecisionRequest::approve(session.pending_ids()))
        .await
        .unwrap();

    let session = wait_for(&engine, &id, |s| s.delivery_failure.is_some()).await;
    assert_eq!(session.deliveries[0].attempts, 1);
    assert!(session.deliveries[0].rejected);
    assert_eq!(sink.attempts(), 1);

    // Redelivery has nothing left to send
    let refusal = redeliver_until_refused(&engine, &id).await;
    assert!(matches!(refusal, WorkflowError::NothingToRedeliver(_)));
    assert_eq!(sink.attempts(), 1);

    let session = engine.session(&id).await.unwrap();
    assert_eq!(session.state, SessionState::Alerting);
    assert!(session.undelivered().is_empty());
    assert_eq!(session.rejected_alerts(), 1);
}

#[tokio::test]
async fn redeliver_outside_alerting_is_refused() {
    let engine = build_engine(
        test_config(),
        Arc::new(fixture_market().await),
        Arc::new(RecordingStore::new()),
        RecordingSink::new(),
    );

    let id = engine.start_scan(instruments(&["CCC"])).await.unwrap();
    wait_for_pending(&engine, &id).await;
    assert!(matches!(
        engine.redeliver(&id).await,
        Err(WorkflowError::WrongState { .. })
    ));
}

#[tokio::test]
async fn cancel_interrupts_in_flight_analysis() {
    let engine = build_engine(
        test_config(),
        Arc::new(StallingMarketData),
        Arc::new(RecordingStore::new()),
        RecordingSink::new(),
    );

    let id = engine.start_scan(instruments(&["AAA", "BBB"])).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.cancel(&id).await.unwrap();

    let session = wait_for_terminal(&engine, &id).await;
    assert_eq!(session.state, SessionState::Cancelled);
    assert!(engine.active_sessions().await.is_empty());

    assert!(matches!(
        engine.cancel(&id).await,
        Err(WorkflowError::AlreadyTerminal(_))
    ));
}

#[tokio::test]
async fn cancel_while_pending_approval() {
    let engine = build_engine(
        test_config(),
        Arc::new(fixture_market().await),
        Arc::new(RecordingStore::new()),
        RecordingSink::new(),
    );

    let id = engine.start_scan(instruments(&["CCC"])).await.unwrap();
    wait_for_pending(&engine, &id).await;
    engine.cancel(&id).await.unwrap();

    let session = wait_for_state(&engine, &id, SessionState::Cancelled).await;
    assert!(session.decisions.is_empty());

    let late = engine
        .submit_decision(&id, DecisionRequest::reject_all())
        .await;
    assert!(matches!(
        late,
        Err(WorkflowError::Approval(ApprovalError::StaleDecision(_)))
    ));
}

#[tokio::test]
async fn checkpoint_failure_fails_session() {
    // write 1 is Scanning, write 2 (Analyzing) is refused
    let store = Arc::new(FlakyStore::failing_on(&[2]));
    let engine = build_engine(
        test_config(),
        Arc::new(fixture_market().await),
        store.clone(),
        RecordingSink::new(),
    );

    let id = engine.start_scan(instruments(&["CCC"])).await.unwrap();
    let session = wait_for_terminal(&engine, &id).await;

    assert_eq!(session.state, SessionState::Failed);
    assert!(session.reason.unwrap().contains("checkpoint write failed"));
    assert!(store.list_unresolved().await.unwrap().is_empty());
}

#[tokio::test]
async fn unwritable_cancellation_fails_the_session() {
    let store = Arc::new(FlakyStore::failing_on(&[]));
    let engine = build_engine(
        test_config(),
        Arc::new(fixture_market().await),
        store.clone(),
        RecordingSink::new(),
    );

    let id = engine.start_scan(instruments(&["CCC"])).await.unwrap();
    wait_for_pending(&engine, &id).await;
    store.fail_next_save();
    engine.cancel(&id).await.unwrap();

    let session = wait_for_terminal(&engine, &id).await;
    assert_eq!(session.state, SessionState::Failed);
    assert!(session.reason.unwrap().contains("checkpoint write failed"));
    assert!(store.list_unresolved().await.unwrap().is_empty());
}

#[tokio::test]
async fn start_fails_when_first_checkpoint_cannot_be_written() {
    let engine = build_engine(
        test_config(),
        Arc::new(fixture_market().await),
        Arc::new(FlakyStore::failing_on(&[1])),
        RecordingSink::new(),
    );

    assert!(matches!(
        engine.start_scan(instruments(&["CCC"])).await,
        Err(WorkflowError::Store(_))
    ));
}

#[tokio::test]
async fn analysis_respects_concurrency_limit() {
    let inner = StaticMarketData::new();
    let symbols: Vec<String> = (0..8).map(|i| format!("S{}", i)).collect();
    for symbol in &symbols {
        inner.set_bars(symbol, ccc_bars()).await;
    }
    let market = Arc::new(CountingMarketData::new(inner));
    let engine = build_engine(
        test_config().with_max_concurrency(2),
        market.clone(),
        Arc::new(RecordingStore::new()),
        RecordingSink::new(),
    );

    let refs: Vec<&str> = symbols.iter().map(String::as_str).collect();
    let id = engine.start_scan(instruments(&refs)).await.unwrap();
    let session = wait_for_pending(&engine, &id).await;

    assert_eq!(session.results.len(), 8);
    assert_eq!(session.pending.len(), 8);
    assert!(market.max_seen.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn unknown_session() {
    let engine = build_engine(
        test_config(),
        Arc::new(StaticMarketData::new()),
        Arc::new(RecordingStore::new()),
        RecordingSink::new(),
    );
    assert!(matches!(
        engine.session("missing").await,
        Err(WorkflowError::SessionNotFound(_))
    ));
    assert!(matches!(
        engine.cancel("missing").await,
        Err(WorkflowError::SessionNotFound(_))
    ));
}
