//! Box command handlers: reads, purchases and the reveal lifecycle.

use std::sync::Arc;

use cipherbox_ledger::{Clock, Ledger};
use cipherbox_lifecycle::{LifecycleError, RecoveryStep};
use cipherbox_types::{BoxInfo, ExecutionMode, Wei};
use rand::Rng;
use serde_json::Value;

use super::{box_id, caller, optional_address, optional_mode, read_mode, required_u64};
use crate::reveals::spawn_reveal;
use crate::rpc::RpcError;
use crate::sweeper::expire_box;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Prize for a new box: uniform in 50%..=150% of the price, whole percents.
pub fn draw_prize(price: Wei) -> Wei {
    let percent: Wei = rand::thread_rng().gen_range(50..=150);
    price.saturating_mul(percent) / 100
}

async fn box_view(state: &DaemonState, mode: ExecutionMode, info: BoxInfo) -> Value {
    let recovery = if info.status.is_awaiting_decryption() {
        state
            .orchestrator
            .recovery(mode)
            .next_step(info.box_id, state.clock.now())
            .await
            .ok()
    } else {
        None
    };
    serde_json::json!({
        "mode": mode,
        "reveal_running": state.reveals.is_running(mode, info.box_id),
        "recovery": recovery,
        "box": info,
    })
}

/// Get one box.
pub async fn get_box(state: &Arc<DaemonState>, params: &Value) -> Result {
    let box_id = box_id(params)?;
    let mode = read_mode(state, params).await?;
    let info = state.ledger(mode).get_box_info(box_id).await?;
    Ok(box_view(state, mode, info).await)
}

/// Get every box owned by `owner` (default: the caller).
pub async fn get_user_boxes(state: &Arc<DaemonState>, params: &Value) -> Result {
    let owner = match optional_address(params, "owner")? {
        Some(owner) => owner,
        None => caller(state, params)?,
    };
    let mode = read_mode(state, params).await?;
    let ledger = state.ledger(mode);

    let mut boxes = Vec::new();
    for box_id in ledger.get_user_box_ids(owner).await? {
        let info = ledger.get_box_info(box_id).await?;
        boxes.push(box_view(state, mode, info).await);
    }
    Ok(serde_json::json!({"owner": owner, "mode": mode, "boxes": boxes}))
}

/// Get one series, or all of them when no `series_id` is given.
pub async fn get_series(state: &Arc<DaemonState>, params: &Value) -> Result {
    let mode = read_mode(state, params).await?;
    let ledger = state.ledger(mode);
    if params.get("series_id").is_some() {
        let series = ledger
            .get_series_info(required_u64(params, "series_id")?)
            .await?;
        return Ok(serde_json::json!(series));
    }

    let mut all = Vec::new();
    for series_id in 1..=ledger.total_series().await? {
        all.push(ledger.get_series_info(series_id).await?);
    }
    Ok(serde_json::json!(all))
}

/// Buy the next box of a series at its list price.
pub async fn purchase_box(state: &Arc<DaemonState>, params: &Value) -> Result {
    let series_id = required_u64(params, "series_id")?;
    let buyer = caller(state, params)?;
    let mode = read_mode(state, params).await?;
    let ledger = state.ledger(mode);

    let series = ledger.get_series_info(series_id).await?;
    let prize = draw_prize(series.price);
    let (box_id, receipt) = ledger
        .purchase_box(buyer, series_id, series.price, prize)
        .await?;

    Ok(serde_json::json!({
        "box_id": box_id,
        "series_id": series_id,
        "mode": mode,
        "price": series.price.to_string(),
        "tx_hash": receipt.tx_hash,
    }))
}

/// Start revealing a box in the background.
///
/// Ownership and terminal status are checked up front; everything after
/// submission is reported through events.
pub async fn open_box(state: &Arc<DaemonState>, params: &Value) -> Result {
    let box_id = box_id(params)?;
    let owner = caller(state, params)?;
    let mode = match optional_mode(params)? {
        Some(mode) => mode,
        None => state.orchestrator.active_mode().await?,
    };

    let info = state.ledger(mode).get_box_info(box_id).await?;
    if info.owner != owner {
        return Err(LifecycleError::Unauthorized {
            caller: owner,
            action: "open box",
        }
        .into());
    }
    if info.status.is_terminal() {
        return Err(LifecycleError::AlreadyTerminal {
            box_id,
            status: info.status,
        }
        .into());
    }

    spawn_reveal(state, mode, owner, box_id)?;
    Ok(serde_json::json!({
        "box_id": box_id,
        "mode": mode,
        "resumed": info.status.is_awaiting_decryption(),
    }))
}

/// Stop the background reveal of a box. The ledger request stays live.
pub async fn cancel_reveal(state: &Arc<DaemonState>, params: &Value) -> Result {
    let box_id = box_id(params)?;
    let mode = read_mode(state, params).await?;
    let cancelled = state.reveals.cancel(mode, box_id).await;
    Ok(serde_json::json!({"box_id": box_id, "cancelled": cancelled}))
}

/// Supersede the live request and restart the reveal pipeline.
pub async fn retry_decryption(state: &Arc<DaemonState>, params: &Value) -> Result {
    let box_id = box_id(params)?;
    let from = caller(state, params)?;
    let mode = ExecutionMode::Encrypted;
    let ledger = state.ledger(mode);
    let recovery = state.orchestrator.recovery(mode);

    let info = ledger.get_box_info(box_id).await?;
    if from != info.owner && from != ledger.owner().await? {
        return Err(LifecycleError::Unauthorized {
            caller: from,
            action: "retry decryption",
        }
        .into());
    }

    // Only stop the running pipeline when the ledger should accept the retry.
    let step = recovery.next_step(box_id, state.clock.now()).await?;
    let was_running = step == RecoveryStep::Retry && state.reveals.cancel(mode, box_id).await;

    let request_id = match recovery.retry(from, box_id).await {
        Ok(request_id) => request_id,
        Err(err) => {
            if was_running {
                spawn_reveal(state, mode, info.owner, box_id)?;
            }
            return Err(err.into());
        }
    };

    spawn_reveal(state, mode, info.owner, box_id)?;
    Ok(serde_json::json!({"box_id": box_id, "request_id": request_id}))
}

/// Expire a box past its deadline and refund the owner.
pub async fn cancel_expired_box(state: &Arc<DaemonState>, params: &Value) -> Result {
    let box_id = box_id(params)?;
    let from = caller(state, params)?;
    let refund = expire_box(state, from, box_id).await?;
    Ok(serde_json::json!({"box_id": box_id, "refund": refund.to_string()}))
}

/// Pay out the revealed prize.
///
/// `mode` is required: box ids are numbered per ledger, so falling back to
/// the active path could pay out a different box after a mode switch.
pub async fn withdraw_prize(state: &Arc<DaemonState>, params: &Value) -> Result {
    let box_id = box_id(params)?;
    let owner = caller(state, params)?;
    let mode = optional_mode(params)?
        .ok_or_else(|| RpcError::invalid_params("mode is required to withdraw a prize"))?;
    let amount = state.orchestrator.withdraw(mode, owner, box_id).await?;
    Ok(serde_json::json!({"box_id": box_id, "amount": amount.to_string()}))
}
