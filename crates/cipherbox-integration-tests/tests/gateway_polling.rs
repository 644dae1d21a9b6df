//! Integration test: gateway polling and health probing.
//!
//! Drives the poller and the health monitor against scripted gateway replies
//! with tokio's paused clock, so the fixed 5 s poll interval costs nothing.

use std::sync::Arc;

use cipherbox_gateway::poller::{DEFAULT_INTERVAL, DEFAULT_MAX_ATTEMPTS};
use cipherbox_gateway::{
    GatewayHealthMonitor, GatewayPoller, GatewayReply, HealthOptions, PollOptions, TickOutcome,
};
use cipherbox_integration_tests::ScriptedGateway;
use cipherbox_types::{Address, GatewayStatus, RequestId};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const CHAIN_ID: u64 = 11_155_111;

#[tokio::test(start_paused = true)]
async fn ready_on_fourth_attempt() {
    let gateway = ScriptedGateway::new(vec![
        GatewayReply::new(404, ""),
        GatewayReply::new(404, ""),
        GatewayReply::new(404, ""),
        GatewayReply::new(200, r#"{"decryptedValue":"250"}"#),
    ]);
    let poller = GatewayPoller::new(gateway.clone(), CHAIN_ID, PollOptions::default());
    let mut percentages = Vec::new();
    let start = Instant::now();

    let outcome = poller
        .poll_decryption(
            RequestId::from_u64(7),
            Address([0xe1; 20]),
            &CancellationToken::new(),
            |p| percentages.push(p.percentage),
        )
        .await;

    assert!(outcome.success(), "fourth reply is a 200");
    assert_eq!(outcome.attempts(), 4);
    assert_eq!(outcome.data().expect("payload")["decryptedValue"], "250");
    assert_eq!(gateway.calls(), 4);
    assert_eq!(percentages, vec![2, 3, 5, 7]);
    assert_eq!(start.elapsed(), DEFAULT_INTERVAL * 3);
}

#[tokio::test(start_paused = true)]
async fn never_ready_times_out_after_budget() {
    let gateway = ScriptedGateway::new(Vec::new());
    let poller = GatewayPoller::new(gateway.clone(), CHAIN_ID, PollOptions::default());

    let outcome = poller
        .poll_decryption(
            RequestId::from_u64(8),
            Address([0xe1; 20]),
            &CancellationToken::new(),
            |_| {},
        )
        .await;

    assert!(!outcome.success());
    assert_eq!(outcome.attempts(), DEFAULT_MAX_ATTEMPTS);
    assert_eq!(gateway.calls(), DEFAULT_MAX_ATTEMPTS);
    assert!(outcome.error().expect("error").contains("timeout"));
    assert!(outcome.data().is_none());
}

#[tokio::test(start_paused = true)]
async fn cancelling_stops_polling_early() {
    let gateway = ScriptedGateway::new(Vec::new());
    let poller = Arc::new(GatewayPoller::new(
        gateway.clone(),
        CHAIN_ID,
        PollOptions::default(),
    ));
    let cancel = CancellationToken::new();

    let task = {
        let poller = poller.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            poller
                .poll_decryption(RequestId::from_u64(9), Address::ZERO, &cancel, |_| {})
                .await
        })
    };
    tokio::time::sleep(DEFAULT_INTERVAL * 2 + DEFAULT_INTERVAL / 2).await;
    cancel.cancel();

    let outcome = task.await.expect("join");
    assert!(!outcome.success());
    assert_eq!(outcome.attempts(), 3);
    assert_eq!(gateway.calls(), 3);
}

#[tokio::test]
async fn wrong_key_prefix_is_unhealthy() {
    let gateway = ScriptedGateway::with_key(GatewayReply::new(
        200,
        format!("0x03abc{}", "0".repeat(80)),
    ));
    let monitor = GatewayHealthMonitor::new(gateway, HealthOptions::default());

    assert!(!monitor.check_health().await);
    assert_eq!(monitor.tick().await, TickOutcome::Checked(GatewayStatus::Down));
    assert_eq!(monitor.current().status, GatewayStatus::Down);
    assert!(monitor.current().last_checked_at.is_some());
}

#[tokio::test]
async fn valid_key_is_healthy() {
    let gateway = ScriptedGateway::with_key(GatewayReply::new(
        200,
        format!("0x04{}", "cd".repeat(64)),
    ));
    let monitor = GatewayHealthMonitor::new(gateway, HealthOptions::default());
    let mut updates = monitor.subscribe();

    assert_eq!(monitor.tick().await, TickOutcome::Checked(GatewayStatus::Up));
    assert_eq!(updates.borrow_and_update().status, GatewayStatus::Up);
}

#[tokio::test]
async fn unreachable_key_endpoint_is_unhealthy() {
    let gateway = ScriptedGateway::new(Vec::new());
    let monitor = GatewayHealthMonitor::new(gateway, HealthOptions::default());
    assert!(!monitor.check_health().await);
}
