//! Gateway health and execution mode handlers.

use std::sync::Arc;

use cipherbox_gateway::TickOutcome;
use cipherbox_lifecycle::LifecycleError;
use cipherbox_types::ExecutionMode;
use serde_json::Value;

use crate::events::EXECUTION_MODE_CHANGED;
use crate::monitor::apply_health;
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

pub async fn get_gateway_status(state: &Arc<DaemonState>) -> Result {
    let snapshot = state.orchestrator.modes().read().await.snapshot();
    Ok(serde_json::json!({
        "health": state.health.current(),
        "mode": snapshot,
        "chain_id": state.config.gateway.chain_id,
        "local_oracle": state.oracle.is_some(),
        "reveals_running": state.reveals.running(),
        "events_published": state.event_bus.sequence(),
    }))
}

/// Probe the gateway now instead of waiting for the next tick.
pub async fn check_gateway_now(state: &Arc<DaemonState>) -> Result {
    match state.health.tick().await {
        TickOutcome::Checked(status) => {
            apply_health(state, state.health.current()).await;
            let snapshot = state.orchestrator.modes().read().await.snapshot();
            Ok(serde_json::json!({"checked": true, "status": status, "mode": snapshot}))
        }
        TickOutcome::Skipped => Ok(serde_json::json!({
            "checked": false,
            "status": state.health.current().status,
        })),
    }
}

/// Pin an execution mode and turn auto mode off.
pub async fn set_execution_mode(state: &Arc<DaemonState>, params: &Value) -> Result {
    let mode: ExecutionMode = params
        .get("mode")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::invalid_params("mode required"))?
        .parse()
        .map_err(|_| RpcError::invalid_params("mode must be plaintext or encrypted"))?;

    let snapshot = {
        let mut modes = state.orchestrator.modes().write().await;
        modes
            .pin(mode)
            .map_err(|e| RpcError::from(LifecycleError::from(e)))?;
        modes.snapshot()
    };
    state.event_bus.publish(
        EXECUTION_MODE_CHANGED,
        serde_json::json!({"mode": mode, "auto": false, "reason": "operator"}),
    );
    Ok(serde_json::json!(snapshot))
}

pub async fn set_auto_mode(state: &Arc<DaemonState>, params: &Value) -> Result {
    let enabled = params
        .get("enabled")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| RpcError::invalid_params("enabled required"))?;

    let snapshot = {
        let mut modes = state.orchestrator.modes().write().await;
        modes.set_auto(enabled);
        modes.snapshot()
    };
    state.event_bus.publish(
        EXECUTION_MODE_CHANGED,
        serde_json::json!({"mode": snapshot.active, "auto": enabled, "reason": "operator"}),
    );
    Ok(serde_json::json!(snapshot))
}
