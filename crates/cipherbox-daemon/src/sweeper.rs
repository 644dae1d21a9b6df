//! Expiry sweeper.
//!
//! Boxes whose decryption deadline passed are cancelled on the owner's
//! behalf, so none stays stuck in `PENDING_DECRYPT` or `DECRYPTING` without
//! anyone noticing. Only the encrypted ledger has outstanding requests.

use std::sync::Arc;
use std::time::Duration;

use cipherbox_ledger::Clock;
use cipherbox_types::{Address, BoxId, ExecutionMode, Wei};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::BOX_EXPIRED;
use crate::DaemonState;

/// Expire one box, stop its pipeline and announce the refund.
pub async fn expire_box(
    state: &DaemonState,
    caller: Address,
    box_id: BoxId,
) -> cipherbox_lifecycle::Result<Wei> {
    let refund = state
        .orchestrator
        .recovery(ExecutionMode::Encrypted)
        .cancel_expired(caller, box_id)
        .await?;
    state.reveals.cancel(ExecutionMode::Encrypted, box_id).await;
    state.event_bus.publish(
        BOX_EXPIRED,
        serde_json::json!({"box_id": box_id, "refund": refund.to_string()}),
    );
    Ok(refund)
}

/// Run one sweep. Returns the boxes that were expired.
pub async fn sweep_once(state: &DaemonState) -> Vec<BoxId> {
    let now = state.clock.now();
    let awaiting = match state.encrypted.boxes_awaiting_decryption().await {
        Ok(boxes) => boxes,
        Err(e) => {
            warn!(error = %e, "expiry sweep could not list boxes");
            return Vec::new();
        }
    };

    let mut expired = Vec::new();
    for info in awaiting.into_iter().filter(|info| info.is_expired_at(now)) {
        match expire_box(state, state.config.ledger.operator, info.box_id).await {
            Ok(refund) => {
                info!(box_id = info.box_id, refund = %refund, "sweeper expired box");
                expired.push(info.box_id);
            }
            Err(e) => warn!(box_id = info.box_id, error = %e, "sweeper could not expire box"),
        }
    }
    debug!(now, expired = expired.len(), "expiry sweep complete");
    expired
}

/// Sweep immediately, then every `sweep_interval_secs` until cancelled.
pub async fn run(state: Arc<DaemonState>, cancel: CancellationToken) {
    let period = Duration::from_secs(state.config.ledger.sweep_interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                sweep_once(&state).await;
            }
        }
    }
    debug!("expiry sweeper stopped");
}

#[cfg(test)]
mod tests {
    use cipherbox_ledger::Ledger;
    use cipherbox_types::BoxStatus;

    use super::*;
    use crate::events::DECRYPTION_PROGRESS;
    use crate::testing::{alice_box, local_state, next_event, ok, ALICE};

    #[tokio::test]
    async fn test_sweep_expires_only_past_deadline() {
        let (state, clock) = local_state(false).await;
        let mut events = state.event_bus.subscribe();
        let stale = alice_box(&state).await;
        let fresh = alice_box(&state).await;

        ok(
            &state,
            "open_box",
            serde_json::json!({"box_id": stale, "from": ALICE.to_string()}),
        )
        .await;
        next_event(&mut events, DECRYPTION_PROGRESS).await;

        assert!(sweep_once(&state).await.is_empty());

        clock.advance(3_000);
        ok(
            &state,
            "open_box",
            serde_json::json!({"box_id": fresh, "from": ALICE.to_string()}),
        )
        .await;
        clock.advance(600);

        assert_eq!(sweep_once(&state).await, vec![stale]);
        assert!(!state.reveals.is_running(ExecutionMode::Encrypted, stale));
        let expired = next_event(&mut events, BOX_EXPIRED).await;
        assert_eq!(expired.box_id(), Some(stale));

        let info = state.encrypted.get_box_info(stale).await.expect("info");
        assert_eq!(info.status, BoxStatus::Expired);
        let info = state.encrypted.get_box_info(fresh).await.expect("info");
        assert!(info.status.is_awaiting_decryption());

        state.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let (state, _clock) = local_state(false).await;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(state.clone(), cancel.clone()));

        tokio::time::sleep(Duration::from_secs(1_000)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("sweeper exits")
            .expect("join");
    }
}
