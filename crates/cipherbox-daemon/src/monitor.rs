//! Wires gateway health into mode selection.
//!
//! The health monitor publishes on a watch channel; this task feeds every
//! observation to the [`ModeSelector`](cipherbox_gateway::ModeSelector) and
//! turns confirmed changes into events.

use std::sync::Arc;

use cipherbox_types::GatewayHealth;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::events::{EXECUTION_MODE_CHANGED, GATEWAY_STATUS_CHANGED};
use crate::DaemonState;

/// Apply one health observation. Returns whether anything changed.
pub async fn apply_health(state: &DaemonState, health: GatewayHealth) -> bool {
    let (before, after, switched, auto) = {
        let mut modes = state.orchestrator.modes().write().await;
        let before = modes.health();
        let switched = modes.on_health_transition(health.status);
        (before, modes.health(), switched, modes.is_auto())
    };

    if before != after {
        state.event_bus.publish(
            GATEWAY_STATUS_CHANGED,
            serde_json::json!({
                "from": before,
                "status": after,
                "last_checked_at": health.last_checked_at,
            }),
        );
    }
    if let Some(mode) = switched {
        state.event_bus.publish(
            EXECUTION_MODE_CHANGED,
            serde_json::json!({"mode": mode, "auto": auto, "reason": "gateway"}),
        );
    }
    before != after || switched.is_some()
}

/// Follow the health watch channel until cancelled.
pub async fn follow_health(state: Arc<DaemonState>, cancel: CancellationToken) {
    let mut health = state.health.subscribe();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = health.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        let observed = *health.borrow_and_update();
        apply_health(&state, observed).await;
    }
    debug!("health follower stopped");
}
