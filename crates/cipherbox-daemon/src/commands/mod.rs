//! IPC command handlers.
//!
//! Each submodule implements the commands for one IPC category. The
//! helpers below pull typed parameters out of the JSON params object.

pub mod admin;
pub mod boxes;
pub mod gateway;

use cipherbox_types::{Address, BoxId, ExecutionMode, Wei};
use serde_json::Value;

use crate::rpc::RpcError;
use crate::DaemonState;

type ParamResult<T> = std::result::Result<T, RpcError>;

/// A required unsigned integer parameter.
pub(crate) fn required_u64(params: &Value, key: &str) -> ParamResult<u64> {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| RpcError::invalid_params(&format!("{key} required")))
}

pub(crate) fn box_id(params: &Value) -> ParamResult<BoxId> {
    required_u64(params, "box_id")
}

/// Amounts are accepted as decimal strings or JSON numbers.
pub(crate) fn wei(params: &Value, key: &str) -> ParamResult<Wei> {
    match params.get(key) {
        Some(Value::String(s)) => s
            .parse()
            .map_err(|_| RpcError::invalid_params(&format!("{key} must be a wei amount"))),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Wei::from)
            .ok_or_else(|| RpcError::invalid_params(&format!("{key} must be a wei amount"))),
        _ => Err(RpcError::invalid_params(&format!("{key} required"))),
    }
}

pub(crate) fn optional_address(params: &Value, key: &str) -> ParamResult<Option<Address>> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| RpcError::invalid_params(&format!("{key} must be an address"))),
        None => Ok(None),
    }
}

/// Transaction sender: `from`, or the configured operator.
pub(crate) fn caller(state: &DaemonState, params: &Value) -> ParamResult<Address> {
    Ok(optional_address(params, "from")?.unwrap_or(state.config.ledger.operator))
}

pub(crate) fn optional_mode(params: &Value) -> ParamResult<Option<ExecutionMode>> {
    match params.get("mode").and_then(|v| v.as_str()) {
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| RpcError::invalid_params("mode must be plaintext or encrypted")),
        None => Ok(None),
    }
}

/// Ledger to read from: `mode`, or the active one even when it is
/// currently disabled.
pub(crate) async fn read_mode(state: &DaemonState, params: &Value) -> ParamResult<ExecutionMode> {
    match optional_mode(params)? {
        Some(mode) => Ok(mode),
        None => Ok(state.orchestrator.modes().read().await.snapshot().active),
    }
}
