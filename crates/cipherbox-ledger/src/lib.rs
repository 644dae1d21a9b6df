//! # cipherbox-ledger
//!
//! The authoritative ledger surface consumed by the reveal orchestrator.
//!
//! The ledger owns box state. Clients interact with it through the
//! [`Ledger`] trait (owner and operator transactions plus reads) and the
//! decryption oracle reports back through [`OracleCallback`]. A
//! store-agnostic [`ReferenceLedger`] implements both against any
//! [`LedgerStore`], so local deployments and tests run the same contract
//! rules.
//!
//! ## Modules
//!
//! - [`clock`] — Ledger time source
//! - [`state_machine`] — Guarded box transitions
//! - [`store`] — Storage abstraction and the in-memory store
//! - [`contract`] — Reference contract implementing the ledger traits

pub mod clock;
pub mod contract;
pub mod state_machine;
pub mod store;

use async_trait::async_trait;
use cipherbox_types::{
    Address, BoxId, BoxInfo, BoxStatus, DecryptionRequest, ExecutionMode, LedgerConstants,
    RequestId, SeriesId, TxReceipt, Wei,
};

pub use clock::{Clock, ManualClock, SystemClock};
pub use contract::{ContractConfig, ReferenceLedger, SubmissionEventStyle};
pub use state_machine::BoxRecord;
pub use store::{LedgerStore, MemoryStore};

/// Error types for ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// No box with this id.
    #[error("box not found: {0}")]
    BoxNotFound(BoxId),

    /// No decryption request with this id.
    #[error("decryption request not found: {0}")]
    RequestNotFound(RequestId),

    /// No series with this id.
    #[error("series not found: {0}")]
    SeriesNotFound(SeriesId),

    /// Caller is not permitted to perform the action.
    #[error("{caller} is not authorized to {action}")]
    Unauthorized {
        /// The transaction sender.
        caller: Address,
        /// The attempted action.
        action: &'static str,
    },

    /// The box status does not allow the action.
    #[error("box {box_id} is {status}; cannot {action}")]
    InvalidStatus {
        /// The box.
        box_id: BoxId,
        /// Its current status.
        status: BoxStatus,
        /// The attempted action.
        action: &'static str,
    },

    /// The box is in a terminal status.
    #[error("box {box_id} is already terminal ({status})")]
    AlreadyTerminal {
        /// The box.
        box_id: BoxId,
        /// Its terminal status.
        status: BoxStatus,
    },

    /// The retry budget is exhausted.
    #[error("box {box_id} used {retry_count} of {max_retries} retries")]
    RetryLimitExceeded {
        /// The box.
        box_id: BoxId,
        /// Retries already used by the live request.
        retry_count: u32,
        /// The ledger's retry budget.
        max_retries: u32,
    },

    /// Cancellation attempted before the deadline.
    #[error("box {box_id} not expired: deadline {expires_at}, now {now}")]
    NotExpired {
        /// The box.
        box_id: BoxId,
        /// The outstanding request deadline.
        expires_at: u64,
        /// Ledger time of the attempt.
        now: u64,
    },

    /// Retry attempted after the deadline; the box must be cancelled instead.
    #[error("box {box_id} request expired at {expires_at} (now {now})")]
    RequestExpired {
        /// The box.
        box_id: BoxId,
        /// The outstanding request deadline.
        expires_at: u64,
        /// Ledger time of the attempt.
        now: u64,
    },

    /// Oracle answered a request that is superseded or already processed.
    #[error("decryption request {0} is no longer live")]
    StaleRequest(RequestId),

    /// Series is inactive or sold out.
    #[error("series {0} is not available")]
    SeriesUnavailable(SeriesId),

    /// Payment does not match the series price.
    #[error("incorrect payment: expected {expected}, got {actual}")]
    IncorrectPayment {
        /// The series price.
        expected: Wei,
        /// The amount sent.
        actual: Wei,
    },

    /// Contract balance cannot cover the payout.
    #[error("insufficient contract funds: need {required}, have {available}")]
    InsufficientFunds {
        /// Amount to pay out.
        required: Wei,
        /// Contract balance.
        available: Wei,
    },

    /// Rejected series parameters.
    #[error("invalid series: {0}")]
    InvalidSeries(String),

    /// Backing store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Failure talking to a remote ledger.
    #[error("ledger transport error: {0}")]
    Transport(String),
}

/// Convenience result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// The ledger surface used by clients.
///
/// Transaction methods take the sender address explicitly; signing and key
/// custody happen outside this crate.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Whether this contract seals prizes or stores them in clear.
    fn mode(&self) -> ExecutionMode;

    /// Address of the contract, sent to the gateway with every poll.
    fn contract_address(&self) -> Address;

    /// `CALLBACK_GAS_LIMIT`, `REQUEST_TIMEOUT` and `MAX_RETRIES`.
    async fn constants(&self) -> Result<LedgerConstants>;

    /// Contract owner (the only account allowed to emergency-resolve).
    async fn owner(&self) -> Result<Address>;

    async fn get_box_info(&self, box_id: BoxId) -> Result<BoxInfo>;

    async fn get_decryption_request(&self, request_id: RequestId) -> Result<DecryptionRequest>;

    async fn get_user_box_ids(&self, owner: Address) -> Result<Vec<BoxId>>;

    /// Submit the open request. In encrypted mode this records a new
    /// decryption request and emits a submission event.
    async fn open_box(&self, from: Address, box_id: BoxId) -> Result<TxReceipt>;

    /// Supersede the live request with a fresh one.
    async fn retry_decryption(&self, from: Address, box_id: BoxId) -> Result<TxReceipt>;

    /// Move a box whose deadline has passed to `EXPIRED`.
    async fn cancel_expired_box(&self, from: Address, box_id: BoxId) -> Result<TxReceipt>;

    /// Owner-only override that opens a box without the oracle.
    async fn emergency_resolve(
        &self,
        from: Address,
        box_id: BoxId,
        prize_amount: Wei,
    ) -> Result<TxReceipt>;

    /// Pay the revealed prize out to the box owner.
    async fn withdraw_prize(&self, from: Address, box_id: BoxId) -> Result<TxReceipt>;
}

/// Callbacks invoked by the decryption oracle.
#[async_trait]
pub trait OracleCallback: Send + Sync {
    /// The oracle started processing the request.
    async fn acknowledge(&self, request_id: RequestId) -> Result<TxReceipt>;

    /// Finalize the reveal with the decrypted prize.
    async fn fulfill(&self, request_id: RequestId, cleartext: Wei) -> Result<TxReceipt>;

    /// The oracle could not decrypt; the box waits for a retry or expiry.
    async fn reject(&self, request_id: RequestId, reason: &str) -> Result<TxReceipt>;
}
