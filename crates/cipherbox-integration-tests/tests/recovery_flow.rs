//! Integration test: retry budget and expiry on the encrypted ledger.
//!
//! A box whose gateway never answers is retried until the budget runs out,
//! then sits until its deadline and is cancelled for a refund. All ledger
//! time comes from a shared [`ManualClock`].

use std::sync::Arc;

use cipherbox_integration_tests::{buy_box, funded_ledger, ALICE, BOX_PRICE, GENESIS_TIME, OWNER};
use cipherbox_ledger::{Clock, Ledger, LedgerError, ManualClock, OracleCallback};
use cipherbox_lifecycle::{LifecycleError, RecoveryStep, RequestSubmitter, RetryCoordinator};
use cipherbox_types::{BoxStatus, ExecutionMode};

#[tokio::test]
async fn retry_limit_then_expiry() {
    let clock = Arc::new(ManualClock::new(GENESIS_TIME));
    let ledger = funded_ledger(ExecutionMode::Encrypted, clock.clone()).await;
    let box_id = buy_box(&ledger, ALICE, 180).await;

    let submission = RequestSubmitter::new(ledger.clone())
        .submit_open_request(ALICE, box_id)
        .await
        .expect("submit");
    let first = submission.request_id().expect("request id");
    ledger.acknowledge(first).await.expect("ack");

    let coordinator = RetryCoordinator::new(ledger.clone());
    let constants = coordinator.constants().await.expect("constants");

    let mut live = first;
    for round in 0..constants.max_retries {
        clock.advance(60);
        assert_eq!(
            coordinator
                .next_step(box_id, clock.now())
                .await
                .expect("step"),
            RecoveryStep::Retry,
            "round {round} should still allow a retry"
        );
        let next = coordinator.retry(ALICE, box_id).await.expect("retry");
        assert_ne!(next, live);
        live = next;
    }

    let info = ledger.get_box_info(box_id).await.expect("info");
    assert_eq!(info.status, BoxStatus::PendingDecrypt);
    assert_eq!(info.current_request, Some(live));
    let request = ledger.get_decryption_request(live).await.expect("request");
    assert_eq!(request.retry_count, constants.max_retries);
    let expires_at = info.expires_at.expect("deadline");

    // Budget exhausted: both retry and cancel are refused, nothing changes.
    let err = coordinator
        .retry(ALICE, box_id)
        .await
        .expect_err("retry limit");
    assert!(matches!(err, LifecycleError::RetryLimitExceeded { .. }), "{err}");
    let err = coordinator
        .cancel_expired(ALICE, box_id)
        .await
        .expect_err("not expired");
    assert!(matches!(err, LifecycleError::NotExpired { .. }), "{err}");
    assert_eq!(
        ledger.get_box_info(box_id).await.expect("info"),
        info,
        "rejected calls must leave the box untouched"
    );
    assert_eq!(
        coordinator
            .next_step(box_id, clock.now())
            .await
            .expect("step"),
        RecoveryStep::AwaitExpiry { expires_at }
    );

    // Superseded requests can no longer be fulfilled.
    let err = ledger.fulfill(first, 180).await.expect_err("stale");
    assert!(matches!(
        err,
        LedgerError::StaleRequest(_) | LedgerError::RequestNotFound(_)
    ));

    clock.set(expires_at);
    assert_eq!(
        coordinator.next_step(box_id, expires_at).await.expect("step"),
        RecoveryStep::CancelExpired
    );
    let before = ledger.contract_balance().await.expect("balance");
    let refund = coordinator
        .cancel_expired(ALICE, box_id)
        .await
        .expect("cancel");
    assert_eq!(refund, BOX_PRICE);
    assert_eq!(
        ledger.contract_balance().await.expect("balance"),
        before - BOX_PRICE
    );

    let info = ledger.get_box_info(box_id).await.expect("info");
    assert_eq!(info.status, BoxStatus::Expired);
    assert!(info.revealed_prize_amount.is_none());
    assert_eq!(
        coordinator.next_step(box_id, expires_at).await.expect("step"),
        RecoveryStep::Nothing
    );

    // Terminal: nothing else applies.
    let err = coordinator
        .cancel_expired(ALICE, box_id)
        .await
        .expect_err("terminal");
    assert!(matches!(err, LifecycleError::AlreadyTerminal { .. }), "{err}");
    let err = coordinator
        .emergency_resolve(OWNER, box_id, 1)
        .await
        .expect_err("terminal");
    assert!(matches!(err, LifecycleError::AlreadyTerminal { .. }), "{err}");
}

#[tokio::test]
async fn retry_after_deadline_must_cancel() {
    let clock = Arc::new(ManualClock::new(GENESIS_TIME));
    let ledger = funded_ledger(ExecutionMode::Encrypted, clock.clone()).await;
    let box_id = buy_box(&ledger, ALICE, 90).await;
    RequestSubmitter::new(ledger.clone())
        .submit_open_request(ALICE, box_id)
        .await
        .expect("submit");
    let coordinator = RetryCoordinator::new(ledger.clone());
    let constants = coordinator.constants().await.expect("constants");

    clock.advance(constants.request_timeout_secs);
    let err = coordinator
        .retry(ALICE, box_id)
        .await
        .expect_err("expired");
    assert!(matches!(err, LifecycleError::RequestExpired { .. }), "{err}");

    // Anyone may trigger the cancellation once the deadline has passed.
    coordinator
        .cancel_expired(OWNER, box_id)
        .await
        .expect("cancel");
    assert_eq!(
        ledger.get_box_info(box_id).await.expect("info").status,
        BoxStatus::Expired
    );
}

#[tokio::test]
async fn emergency_resolve_rescues_a_stuck_box() {
    let clock = Arc::new(ManualClock::new(GENESIS_TIME));
    let ledger = funded_ledger(ExecutionMode::Encrypted, clock.clone()).await;
    let box_id = buy_box(&ledger, ALICE, 120).await;
    RequestSubmitter::new(ledger.clone())
        .submit_open_request(ALICE, box_id)
        .await
        .expect("submit");
    let coordinator = RetryCoordinator::new(ledger.clone());

    let err = coordinator
        .emergency_resolve(ALICE, box_id, 120)
        .await
        .expect_err("owner only");
    assert!(matches!(err, LifecycleError::Unauthorized { .. }), "{err}");

    coordinator
        .emergency_resolve(OWNER, box_id, 75)
        .await
        .expect("resolve");
    let info = ledger.get_box_info(box_id).await.expect("info");
    assert_eq!(info.status, BoxStatus::Opened);
    assert_eq!(info.revealed_prize_amount, Some(75));
}
