//! cipherbox-daemon: the reveal orchestration daemon.
//!
//! Single OS process running a Tokio async runtime. It hosts the two box
//! ledgers, watches gateway health, drives reveal pipelines in the
//! background and sweeps expired boxes. Clients talk to it via JSON-RPC
//! over a Unix socket.

mod commands;
mod config;
mod events;
mod monitor;
mod oracle;
mod reveals;
mod rpc;
mod sweeper;

use std::sync::Arc;
use std::time::Duration;

use cipherbox_db::SqliteStore;
use cipherbox_gateway::{
    GatewayClient, GatewayHealthMonitor, GatewayPoller, HttpGateway, ModeSelector,
};
use cipherbox_ledger::{Clock, ContractConfig, ReferenceLedger, SystemClock};
use cipherbox_lifecycle::{LedgerSet, RevealOrchestrator};
use cipherbox_types::{Address, ExecutionMode};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::DaemonConfig;
use crate::events::{EventBus, DAEMON_STARTED};
use crate::oracle::LocalOracle;
use crate::reveals::RevealTasks;
use crate::rpc::RpcServer;

/// A box contract backed by a SQLite file.
pub type LocalLedger = ReferenceLedger<SqliteStore>;

/// Daemon-wide shared state.
pub struct DaemonState {
    /// Configuration.
    pub config: DaemonConfig,
    /// Event bus for pushing events to subscribers.
    pub event_bus: EventBus,
    pub encrypted: Arc<LocalLedger>,
    pub plaintext: Arc<LocalLedger>,
    pub orchestrator: Arc<RevealOrchestrator>,
    pub health: Arc<GatewayHealthMonitor>,
    /// Built-in oracle; present on local networks only.
    pub oracle: Option<Arc<LocalOracle>>,
    /// Background reveal pipelines.
    pub reveals: RevealTasks,
    pub clock: Arc<dyn Clock>,
    /// Parent of every task token; cancelled on shutdown.
    pub shutdown: CancellationToken,
}

impl DaemonState {
    /// Wire ledgers, gateway, mode selection and the orchestrator together.
    pub fn assemble(
        config: DaemonConfig,
        encrypted_store: SqliteStore,
        plaintext_store: SqliteStore,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let contract = |address: Address, mode: ExecutionMode| {
            let mut contract = ContractConfig::new(address, config.ledger.operator, mode);
            contract.submission_event = config.submission_event();
            contract
        };
        let encrypted = Arc::new(ReferenceLedger::new(
            contract(config.ledger.encrypted_contract, ExecutionMode::Encrypted),
            encrypted_store,
            clock.clone(),
        ));
        let plaintext = Arc::new(ReferenceLedger::new(
            contract(config.ledger.plaintext_contract, ExecutionMode::Plaintext),
            plaintext_store,
            clock.clone(),
        ));

        let (gateway, oracle): (Arc<dyn GatewayClient>, Option<Arc<LocalOracle>>) =
            if config.gateway.is_local() {
                let oracle = Arc::new(LocalOracle::new(
                    encrypted.clone(),
                    config.gateway.local_auto_fulfill,
                ));
                (oracle.clone(), Some(oracle))
            } else {
                let http = HttpGateway::new(
                    config.gateway.url.clone(),
                    Duration::from_secs(config.gateway.request_timeout_secs.max(1)),
                )?;
                (Arc::new(http), None)
            };

        let modes = if config.mode.auto {
            ModeSelector::new()
        } else {
            ModeSelector::pinned(config.mode.pinned)
        };
        let poller = Arc::new(GatewayPoller::new(
            gateway.clone(),
            config.gateway.chain_id,
            config.poll_options(),
        ));
        let health = Arc::new(GatewayHealthMonitor::new(
            gateway,
            config.gateway.health_options(),
        ));
        let orchestrator = Arc::new(RevealOrchestrator::new(
            LedgerSet {
                plaintext: plaintext.clone(),
                encrypted: encrypted.clone(),
            },
            Arc::new(RwLock::new(modes)),
            poller,
            config.wait_options(),
        ));

        Ok(Self {
            config,
            event_bus: EventBus::new(1000),
            encrypted,
            plaintext,
            orchestrator,
            health,
            oracle,
            reveals: RevealTasks::default(),
            clock,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn ledger(&self, mode: ExecutionMode) -> &Arc<LocalLedger> {
        match mode {
            ExecutionMode::Plaintext => &self.plaintext,
            ExecutionMode::Encrypted => &self.encrypted,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = DaemonConfig::load()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("cipherbox={}", config.advanced.log_level).parse()?),
        )
        .init();

    info!("CipherBox daemon starting");

    // Ensure data directory exists
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 2. Open ledger databases
    let encrypted_store = SqliteStore::open(&data_dir.join("encrypted.db"))?;
    let plaintext_store = SqliteStore::open(&data_dir.join("plaintext.db"))?;

    // 3. Build daemon state
    let state = Arc::new(DaemonState::assemble(
        config,
        encrypted_store,
        plaintext_store,
        Arc::new(SystemClock),
    )?);
    if state.oracle.is_some() {
        info!(chain_id = state.config.gateway.chain_id, "local network; built-in oracle enabled");
    }

    // 4. Background tasks
    tokio::spawn(
        state
            .health
            .clone()
            .run(state.shutdown.child_token()),
    );
    tokio::spawn(monitor::follow_health(
        state.clone(),
        state.shutdown.child_token(),
    ));
    tokio::spawn(sweeper::run(state.clone(), state.shutdown.child_token()));

    // 5. Start IPC server
    let socket_path = data_dir.join("daemon.sock");
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());

    info!("Starting JSON-RPC server on {:?}", socket_path);

    // 6. Emit DaemonStarted event
    state.event_bus.publish(
        DAEMON_STARTED,
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "chain_id": state.config.gateway.chain_id,
        }),
    );

    // 7. Run the RPC server until shutdown
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!("RPC server error: {}", e);
            }
        }
        _ = state.shutdown.cancelled() => {
            info!("Shutdown signal received");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    // Graceful shutdown
    info!("Daemon shutting down gracefully");
    state.shutdown.cancel();

    // Clean up socket file
    let _ = std::fs::remove_file(&socket_path);

    info!("Daemon stopped");
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use cipherbox_db::SqliteStore;
    use cipherbox_ledger::ManualClock;
    use cipherbox_types::{Address, GatewayHealth, GatewayStatus};
    use tokio::sync::broadcast;

    use crate::config::{DaemonConfig, LOCAL_CHAIN_ID};
    use crate::events::Event;
    use crate::rpc::{dispatch_request, RpcRequest, RpcResponse};
    use crate::DaemonState;

    /// The default operator, which owns both contracts.
    pub const OWNER: Address = Address([0x0a; 20]);
    pub const ALICE: Address = Address([0xa1; 20]);

    pub fn local_config(auto_fulfill: bool) -> DaemonConfig {
        let mut config = DaemonConfig::default();
        config.gateway.chain_id = LOCAL_CHAIN_ID;
        config.gateway.local_auto_fulfill = auto_fulfill;
        config.polling.max_attempts = 20;
        config.polling.interval_ms = 50;
        config.callback.max_wait_secs = 5;
        config.callback.poll_interval_ms = 20;
        config
    }

    /// A local-network daemon with the gateway up, one series of 10 boxes
    /// at 100 wei on each ledger and a funded prize pool.
    pub async fn local_state(auto_fulfill: bool) -> (Arc<DaemonState>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let state = DaemonState::assemble(
            local_config(auto_fulfill),
            SqliteStore::open_memory().expect("encrypted store"),
            SqliteStore::open_memory().expect("plaintext store"),
            clock.clone(),
        )
        .expect("assemble");

        crate::monitor::apply_health(
            &state,
            GatewayHealth {
                status: GatewayStatus::Up,
                last_checked_at: Some(1_000),
            },
        )
        .await;
        for ledger in [&state.encrypted, &state.plaintext] {
            ledger
                .create_series(OWNER, "Genesis", 100, 10)
                .await
                .expect("series");
            ledger
                .deposit_prize_fund(OWNER, 10_000)
                .await
                .expect("fund");
        }
        (Arc::new(state), clock)
    }

    pub async fn call(
        state: &Arc<DaemonState>,
        method: &str,
        params: serde_json::Value,
    ) -> RpcResponse {
        dispatch_request(
            state.clone(),
            RpcRequest {
                jsonrpc: "2.0".to_string(),
                id: serde_json::json!(1),
                method: method.to_string(),
                params,
            },
        )
        .await
    }

    /// Call and unwrap the result.
    pub async fn ok(
        state: &Arc<DaemonState>,
        method: &str,
        params: serde_json::Value,
    ) -> serde_json::Value {
        let response = call(state, method, params).await;
        assert!(response.error.is_none(), "{method} failed: {:?}", response.error);
        response.result.expect("result")
    }

    /// Call and unwrap the error code.
    pub async fn err_code(
        state: &Arc<DaemonState>,
        method: &str,
        params: serde_json::Value,
    ) -> i32 {
        call(state, method, params)
            .await
            .error
            .expect("error")
            .code
    }

    /// Wait for the next event of `event_type`.
    pub async fn next_event(rx: &mut broadcast::Receiver<Event>, event_type: &str) -> Event {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let event = rx.recv().await.expect("event bus open");
                if event.event_type == event_type {
                    return event;
                }
            }
        })
        .await
        .expect("event in time")
    }

    /// Buy a box for Alice on the encrypted ledger.
    pub async fn alice_box(state: &Arc<DaemonState>) -> u64 {
        let bought = ok(
            state,
            "purchase_box",
            serde_json::json!({"series_id": 1, "from": ALICE.to_string()}),
        )
        .await;
        bought["box_id"].as_u64().expect("box id")
    }
}
