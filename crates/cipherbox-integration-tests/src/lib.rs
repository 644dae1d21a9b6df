//! Integration test fixtures for the reveal pipeline.
//!
//! The scenarios under `tests/` exercise the gateway, ledger, storage and
//! lifecycle crates together without a running daemon. They share the
//! fixtures below: a scripted gateway and a SQLite-backed reference ledger
//! driven by a [`ManualClock`].
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p cipherbox-integration-tests
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cipherbox_db::SqliteStore;
use cipherbox_gateway::{DecryptRequest, GatewayClient, GatewayReply};
use cipherbox_ledger::{ContractConfig, ManualClock, OracleCallback, ReferenceLedger};
use cipherbox_types::{Address, BoxId, ExecutionMode, RequestId, Wei};

/// Contract owner in every fixture.
pub const OWNER: Address = Address([0x0a; 20]);

/// A box buyer.
pub const ALICE: Address = Address([0xa1; 20]);

/// Ledger time the fixtures start at.
pub const GENESIS_TIME: u64 = 1_700_000_000;

/// Price of a box in the fixture series.
pub const BOX_PRICE: Wei = 100;

pub type TestLedger = ReferenceLedger<SqliteStore>;

/// A reference ledger on an in-memory SQLite store with one funded series.
pub async fn funded_ledger(mode: ExecutionMode, clock: Arc<ManualClock>) -> Arc<TestLedger> {
    let address = match mode {
        ExecutionMode::Encrypted => Address([0xe1; 20]),
        ExecutionMode::Plaintext => Address([0x51; 20]),
    };
    let store = SqliteStore::open_memory().expect("sqlite store");
    let ledger = Arc::new(ReferenceLedger::new(
        ContractConfig::new(address, OWNER, mode),
        store,
        clock,
    ));
    ledger
        .create_series(OWNER, "Genesis", BOX_PRICE, 10)
        .await
        .expect("create series");
    ledger
        .deposit_prize_fund(OWNER, 10_000)
        .await
        .expect("fund");
    ledger
}

/// Buy a box for `owner` with the given sealed prize.
pub async fn buy_box(ledger: &TestLedger, owner: Address, prize: Wei) -> BoxId {
    let (box_id, _) = ledger
        .purchase_box(owner, 1, BOX_PRICE, prize)
        .await
        .expect("purchase");
    box_id
}

/// Replays scripted replies in order, then answers 404 forever.
#[derive(Default)]
pub struct ScriptedGateway {
    replies: Mutex<VecDeque<GatewayReply>>,
    key: Mutex<Option<GatewayReply>>,
    calls: AtomicU32,
}

impl ScriptedGateway {
    pub fn new(replies: Vec<GatewayReply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        })
    }

    /// A gateway whose public-key endpoint answers with `reply`.
    pub fn with_key(reply: GatewayReply) -> Arc<Self> {
        Arc::new(Self {
            key: Mutex::new(Some(reply)),
            ..Self::default()
        })
    }

    /// Public-decrypt calls served so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GatewayClient for ScriptedGateway {
    async fn public_decrypt(
        &self,
        _request: &DecryptRequest,
    ) -> cipherbox_gateway::Result<GatewayReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .replies
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| GatewayReply::new(404, "")))
    }

    async fn public_key(&self) -> cipherbox_gateway::Result<GatewayReply> {
        Ok(self
            .key
            .lock()
            .expect("lock")
            .clone()
            .unwrap_or_else(|| GatewayReply::new(503, "")))
    }
}

/// A gateway backed by the ledger itself: answers 404 until `ready_after`
/// polls have been seen, then lands the oracle callback and returns the
/// cleartext.
pub struct LedgerOracle {
    ledger: Arc<TestLedger>,
    ready_after: u32,
    calls: AtomicU32,
}

impl LedgerOracle {
    pub fn new(ledger: Arc<TestLedger>, ready_after: u32) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            ready_after,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GatewayClient for LedgerOracle {
    async fn public_decrypt(
        &self,
        request: &DecryptRequest,
    ) -> cipherbox_gateway::Result<GatewayReply> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call < self.ready_after {
            return Ok(GatewayReply::new(404, ""));
        }
        let request_id: RequestId = request.handle.parse().expect("handle");
        let Ok(prize) = self.ledger.sealed_prize_for(request_id).await else {
            return Ok(GatewayReply::new(404, ""));
        };
        self.ledger
            .acknowledge(request_id)
            .await
            .expect("acknowledge");
        self.ledger
            .fulfill(request_id, prize)
            .await
            .expect("fulfill");
        Ok(GatewayReply::new(
            200,
            serde_json::json!({ "decryptedValue": prize.to_string() }).to_string(),
        ))
    }

    async fn public_key(&self) -> cipherbox_gateway::Result<GatewayReply> {
        Ok(GatewayReply::new(200, format!("0x04{}", "ab".repeat(64))))
    }
}
