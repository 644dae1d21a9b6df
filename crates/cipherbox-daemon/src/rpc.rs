//! JSON-RPC server over Unix socket.
//!
//! Listens on a Unix domain socket, accepts connections, and dispatches
//! newline-delimited JSON-RPC method calls to the command handlers. A
//! connection that calls `subscribe_events` additionally receives matching
//! daemon events as `event` notifications until it unsubscribes.

use std::path::PathBuf;
use std::sync::Arc;

use cipherbox_ledger::LedgerError;
use cipherbox_lifecycle::LifecycleError;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::commands;
use crate::events::{Event, EventFilter};
use crate::DaemonState;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Method name.
    pub method: String,
    /// Parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    /// JSON-RPC version.
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Result or error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Server-initiated message without an id.
#[derive(Debug, Serialize)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Event,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RpcError {
    /// Stable error code.
    pub code: i32,
    /// Error name.
    pub message: String,
    /// Optional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    fn new(code: i32, message: &str, data: Option<serde_json::Value>) -> Self {
        Self {
            code,
            message: message.to_string(),
            data,
        }
    }

    // Standard JSON-RPC errors

    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self::new(-32700, "PARSE_ERROR", None)
    }

    /// Invalid request (-32600).
    pub fn invalid_request() -> Self {
        Self::new(-32600, "INVALID_REQUEST", None)
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            -32601,
            "METHOD_NOT_FOUND",
            Some(serde_json::json!({"method": method})),
        )
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self::new(
            -32602,
            "INVALID_PARAMS",
            Some(serde_json::json!({"detail": detail})),
        )
    }

    /// Local-oracle command on a public network (-32050).
    pub fn not_local_network(chain_id: u64) -> Self {
        Self::new(
            -32050,
            "NOT_LOCAL_NETWORK",
            Some(serde_json::json!({"chain_id": chain_id})),
        )
    }

    /// Stable code and name for a lifecycle error.
    fn classify(err: &LifecycleError) -> (i32, &'static str) {
        match err {
            LifecycleError::BoxNotFound(_) => (-32001, "BOX_NOT_FOUND"),
            LifecycleError::Unauthorized { .. } => (-32002, "UNAUTHORIZED"),
            LifecycleError::AlreadyTerminal { .. } => (-32003, "ALREADY_TERMINAL"),
            LifecycleError::InvalidStatus { .. } => (-32004, "INVALID_STATUS"),
            LifecycleError::RetryLimitExceeded { .. } => (-32005, "RETRY_LIMIT_EXCEEDED"),
            LifecycleError::RequestExpired { .. } => (-32006, "REQUEST_EXPIRED"),
            LifecycleError::NotExpired { .. } => (-32007, "NOT_EXPIRED"),
            LifecycleError::StaleState { .. } => (-32008, "STALE_STATE"),
            LifecycleError::RequestIdNotFound { .. } => (-32009, "REQUEST_ID_NOT_FOUND"),
            LifecycleError::GatewayTimeout { .. } => (-32010, "GATEWAY_TIMEOUT"),
            LifecycleError::CallbackTimeout { .. } => (-32011, "CALLBACK_TIMEOUT"),
            LifecycleError::UnexpectedTerminal { .. } => (-32012, "UNEXPECTED_TERMINAL"),
            LifecycleError::Cancelled(_) => (-32013, "CANCELLED"),
            LifecycleError::InFlight(_) => (-32014, "REVEAL_IN_FLIGHT"),
            LifecycleError::Mode(_) => (-32020, "ENCRYPTED_MODE_DISABLED"),
            LifecycleError::Ledger(LedgerError::InsufficientFunds { .. }) => {
                (-32040, "INSUFFICIENT_FUNDS")
            }
            LifecycleError::Ledger(LedgerError::SeriesNotFound(_)) => (-32041, "SERIES_NOT_FOUND"),
            LifecycleError::Ledger(LedgerError::SeriesUnavailable(_)) => {
                (-32042, "SERIES_UNAVAILABLE")
            }
            LifecycleError::Ledger(LedgerError::RequestNotFound(_))
            | LifecycleError::Ledger(LedgerError::StaleRequest(_)) => (-32043, "REQUEST_NOT_LIVE"),
            LifecycleError::Ledger(LedgerError::InvalidSeries(_))
            | LifecycleError::Ledger(LedgerError::IncorrectPayment { .. }) => {
                (-32044, "REJECTED_TRANSACTION")
            }
            LifecycleError::Ledger(_) => (-32030, "LEDGER_ERROR"),
        }
    }
}

impl From<LifecycleError> for RpcError {
    fn from(err: LifecycleError) -> Self {
        let (code, message) = Self::classify(&err);
        Self::new(
            code,
            message,
            Some(serde_json::json!({
                "detail": err.to_string(),
                "retryable": err.is_retryable(),
            })),
        )
    }
}

impl From<LedgerError> for RpcError {
    fn from(err: LedgerError) -> Self {
        LifecycleError::from(err).into()
    }
}

/// An event stream attached to one connection.
struct Subscription {
    receiver: broadcast::Receiver<Event>,
    filter: EventFilter,
}

impl Subscription {
    /// Next event passing the filter; `None` once the bus is gone.
    async fn next(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    /// Create a new RPC server.
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove stale socket file
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

async fn write_message<W, T>(writer: &mut W, message: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut json = serde_json::to_string(message)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Handle a single client connection.
async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut subscription: Option<Subscription> = None;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break; // EOF
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = handle_line(&state, &line, &mut subscription).await;
                write_message(&mut writer, &response).await?;
            }
            event = async {
                match subscription.as_mut() {
                    Some(sub) => sub.next().await,
                    None => std::future::pending().await,
                }
            } => {
                match event {
                    Some(event) => {
                        let notification = RpcNotification {
                            jsonrpc: "2.0".to_string(),
                            method: "event".to_string(),
                            params: event,
                        };
                        write_message(&mut writer, &notification).await?;
                    }
                    None => subscription = None,
                }
            }
        }
    }

    Ok(())
}

/// Parse one request line. Subscription management is per connection and
/// handled here; everything else goes through [`dispatch_request`].
async fn handle_line(
    state: &Arc<DaemonState>,
    line: &str,
    subscription: &mut Option<Subscription>,
) -> RpcResponse {
    let request = match serde_json::from_str::<RpcRequest>(line) {
        Ok(request) => request,
        Err(_) => return RpcResponse::error(serde_json::Value::Null, RpcError::parse_error()),
    };
    if request.jsonrpc != "2.0" {
        return RpcResponse::error(request.id, RpcError::invalid_request());
    }

    match request.method.as_str() {
        "subscribe_events" => {
            let filter = match request.params.get("filter") {
                None | Some(serde_json::Value::Null) => EventFilter::default(),
                Some(raw) => match serde_json::from_value(raw.clone()) {
                    Ok(filter) => filter,
                    Err(e) => {
                        return RpcResponse::error(
                            request.id,
                            RpcError::invalid_params(&format!("filter: {e}")),
                        );
                    }
                },
            };
            *subscription = Some(Subscription {
                receiver: state.event_bus.subscribe(),
                filter,
            });
            RpcResponse::success(request.id, serde_json::json!({"subscribed": true}))
        }
        "unsubscribe_events" => {
            let was_subscribed = subscription.take().is_some();
            RpcResponse::success(
                request.id,
                serde_json::json!({"unsubscribed": was_subscribed}),
            )
        }
        _ => dispatch_request(state.clone(), request).await,
    }
}

/// Dispatch a JSON-RPC request to the appropriate command handler.
pub async fn dispatch_request(state: Arc<DaemonState>, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    let method = request.method.as_str();
    let params = &request.params;

    debug!("Dispatching RPC method: {}", method);

    let result = match method {
        // Boxes
        "get_box" => commands::boxes::get_box(&state, params).await,
        "get_user_boxes" => commands::boxes::get_user_boxes(&state, params).await,
        "get_series" => commands::boxes::get_series(&state, params).await,
        "purchase_box" => commands::boxes::purchase_box(&state, params).await,
        "open_box" => commands::boxes::open_box(&state, params).await,
        "cancel_reveal" => commands::boxes::cancel_reveal(&state, params).await,
        "retry_decryption" => commands::boxes::retry_decryption(&state, params).await,
        "cancel_expired_box" => commands::boxes::cancel_expired_box(&state, params).await,
        "withdraw_prize" => commands::boxes::withdraw_prize(&state, params).await,

        // Contract administration
        "create_series" => commands::admin::create_series(&state, params).await,
        "deposit_prize_fund" => commands::admin::deposit_prize_fund(&state, params).await,
        "get_contract_balance" => commands::admin::get_contract_balance(&state, params).await,
        "emergency_resolve" => commands::admin::emergency_resolve(&state, params).await,
        "oracle_fulfill" => commands::admin::oracle_fulfill(&state, params).await,

        // Gateway and mode
        "get_gateway_status" => commands::gateway::get_gateway_status(&state).await,
        "check_gateway_now" => commands::gateway::check_gateway_now(&state).await,
        "set_execution_mode" => commands::gateway::set_execution_mode(&state, params).await,
        "set_auto_mode" => commands::gateway::set_auto_mode(&state, params).await,

        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => RpcResponse::error(id, err),
    }
}

#[cfg(test)]
mod tests {
    use cipherbox_gateway::ModeError;
    use cipherbox_types::BoxStatus;

    use super::*;

    #[test]
    fn test_rpc_error_codes() {
        let err = RpcError::from(LifecycleError::AlreadyTerminal {
            box_id: 1,
            status: BoxStatus::PrizeWithdrawn,
        });
        assert_eq!(err.code, -32003);
        assert_eq!(err.message, "ALREADY_TERMINAL");

        let err = RpcError::from(LifecycleError::Mode(ModeError::EncryptedDisabled));
        assert_eq!(err.code, -32020);

        let err = RpcError::from(LedgerError::InsufficientFunds {
            required: 10,
            available: 5,
        });
        assert_eq!(err.code, -32040);

        let err = RpcError::method_not_found("unknown");
        assert_eq!(err.code, -32601);
    }

    #[test]
    fn test_error_data_flags_retryable() {
        let err = RpcError::from(LifecycleError::CallbackTimeout {
            box_id: 3,
            last_status: Some(BoxStatus::Decrypting),
            elapsed_secs: 120,
        });
        let data = err.data.expect("data");
        assert_eq!(data["retryable"], serde_json::json!(true));
        assert!(data["detail"]
            .as_str()
            .expect("detail")
            .contains("box 3"));
    }

    #[test]
    fn test_rpc_response_success() {
        let resp = RpcResponse::success(
            serde_json::json!(1),
            serde_json::json!({"balance": "1000"}),
        );
        assert!(resp.result.is_some());
        assert!(resp.error.is_none());
    }

    #[test]
    fn test_rpc_response_error() {
        let resp = RpcResponse::error(
            serde_json::json!(1),
            RpcError::invalid_params("test"),
        );
        assert!(resp.result.is_none());
        assert!(resp.error.is_some());
    }

    async fn read_json(
        lines: &mut tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>,
    ) -> serde_json::Value {
        let line = tokio::time::timeout(std::time::Duration::from_secs(5), lines.next_line())
            .await
            .expect("reply in time")
            .expect("read")
            .expect("line");
        serde_json::from_str(&line).expect("json")
    }

    #[tokio::test]
    async fn test_connection_streams_subscribed_events() {
        let (state, _clock) = crate::testing::local_state(true).await;
        let (client, server) = tokio::net::UnixStream::pair().expect("pair");
        let conn = tokio::spawn(handle_connection(state.clone(), server));

        let (reader, mut writer) = client.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"not json\n").await.expect("write");
        let reply = read_json(&mut lines).await;
        assert_eq!(reply["error"]["code"], -32700);

        writer
            .write_all(b"{\"jsonrpc\":\"1.0\",\"id\":1,\"method\":\"get_series\"}\n")
            .await
            .expect("write");
        let reply = read_json(&mut lines).await;
        assert_eq!(reply["error"]["code"], -32600);

        let subscribe = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "subscribe_events",
            "params": {"filter": {"categories": ["gateway"]}},
        });
        write_message(&mut writer, &subscribe).await.expect("write");
        let reply = read_json(&mut lines).await;
        assert_eq!(reply["id"], 2);
        assert_eq!(reply["result"]["subscribed"], true);

        state
            .event_bus
            .publish(crate::events::DAEMON_STARTED, serde_json::json!({}));
        state.event_bus.publish(
            crate::events::GATEWAY_STATUS_CHANGED,
            serde_json::json!({"status": "down"}),
        );
        let notification = read_json(&mut lines).await;
        assert_eq!(notification["method"], "event");
        assert!(notification.get("id").is_none());
        assert_eq!(notification["params"]["event_type"], "GatewayStatusChanged");

        let unsubscribe = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "unsubscribe_events",
        });
        write_message(&mut writer, &unsubscribe).await.expect("write");
        let reply = read_json(&mut lines).await;
        assert_eq!(reply["result"]["unsubscribed"], true);

        drop(writer);
        drop(lines);
        conn.await.expect("join").expect("clean close");
    }
}
