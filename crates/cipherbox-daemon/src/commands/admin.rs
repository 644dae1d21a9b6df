//! Contract administration and local-oracle handlers.

use std::sync::Arc;

use cipherbox_types::{ExecutionMode, RequestId};
use serde_json::Value;

use super::{box_id, caller, read_mode, required_u64, wei};
use crate::events::BOX_OPENED;
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Create a series of boxes. Contract owner only.
pub async fn create_series(state: &Arc<DaemonState>, params: &Value) -> Result {
    let name = params
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::invalid_params("name required"))?;
    let price = wei(params, "price")?;
    let total_boxes = u32::try_from(required_u64(params, "total_boxes")?)
        .map_err(|_| RpcError::invalid_params("total_boxes out of range"))?;
    let from = caller(state, params)?;
    let mode = read_mode(state, params).await?;

    let (series_id, receipt) = state
        .ledger(mode)
        .create_series(from, name, price, total_boxes)
        .await?;
    Ok(serde_json::json!({
        "series_id": series_id,
        "mode": mode,
        "tx_hash": receipt.tx_hash,
    }))
}

/// Add funds that back prize payouts.
pub async fn deposit_prize_fund(state: &Arc<DaemonState>, params: &Value) -> Result {
    let amount = wei(params, "amount")?;
    let from = caller(state, params)?;
    let mode = read_mode(state, params).await?;
    let ledger = state.ledger(mode);

    let receipt = ledger.deposit_prize_fund(from, amount).await?;
    let balance = ledger.contract_balance().await?;
    Ok(serde_json::json!({
        "mode": mode,
        "balance": balance.to_string(),
        "tx_hash": receipt.tx_hash,
    }))
}

pub async fn get_contract_balance(state: &Arc<DaemonState>, params: &Value) -> Result {
    let mode = read_mode(state, params).await?;
    let balance = state.ledger(mode).contract_balance().await?;
    Ok(serde_json::json!({"mode": mode, "balance": balance.to_string()}))
}

/// Force a stuck box open without the oracle. Contract owner only; every
/// call is logged at warn level by the coordinator.
pub async fn emergency_resolve(state: &Arc<DaemonState>, params: &Value) -> Result {
    let box_id = box_id(params)?;
    let prize_amount = wei(params, "prize_amount")?;
    let from = caller(state, params)?;
    let mode = ExecutionMode::Encrypted;

    state.reveals.cancel(mode, box_id).await;
    let receipt = state
        .orchestrator
        .recovery(mode)
        .emergency_resolve(from, box_id, prize_amount)
        .await?;

    state.event_bus.publish(
        BOX_OPENED,
        serde_json::json!({
            "box_id": box_id,
            "mode": mode,
            "prize": prize_amount.to_string(),
            "emergency": true,
        }),
    );
    Ok(serde_json::json!({"box_id": box_id, "tx_hash": receipt.tx_hash}))
}

/// Answer a decryption request through the built-in oracle. Local networks
/// only; `cleartext` defaults to the sealed prize.
pub async fn oracle_fulfill(state: &Arc<DaemonState>, params: &Value) -> Result {
    let Some(oracle) = state.oracle.as_ref() else {
        return Err(RpcError::not_local_network(state.config.gateway.chain_id));
    };
    let request_id: RequestId = params
        .get("request_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::invalid_params("request_id required"))?
        .parse()
        .map_err(|_| RpcError::invalid_params("request_id must be a handle or integer"))?;
    let cleartext = match params.get("cleartext") {
        Some(_) => Some(wei(params, "cleartext")?),
        None => None,
    };

    let (prize, receipt) = oracle.fulfill(request_id, cleartext).await?;
    Ok(serde_json::json!({
        "request_id": request_id,
        "prize": prize.to_string(),
        "tx_hash": receipt.tx_hash,
    }))
}
