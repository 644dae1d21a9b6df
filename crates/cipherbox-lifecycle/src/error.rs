//! Lifecycle error taxonomy.
//!
//! Transient conditions (gateway not ready, network hiccups, failed reads)
//! are absorbed inside the polling loops and never surface here. Everything
//! in this enum is terminal for the operation that produced it.

use cipherbox_gateway::ModeError;
use cipherbox_ledger::LedgerError;
use cipherbox_types::{Address, BoxId, BoxStatus, RequestId, TxHash};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LifecycleError {
    #[error("box not found: {0}")]
    BoxNotFound(BoxId),

    #[error("{caller} is not authorized to {action}")]
    Unauthorized {
        caller: Address,
        action: &'static str,
    },

    /// The box is opened, withdrawn or expired.
    #[error("box {box_id} is already terminal ({status})")]
    AlreadyTerminal { box_id: BoxId, status: BoxStatus },

    #[error("box {box_id} is {status}; cannot {action}")]
    InvalidStatus {
        box_id: BoxId,
        status: BoxStatus,
        action: &'static str,
    },

    #[error("box {box_id} used {retry_count} of {max_retries} retries")]
    RetryLimitExceeded {
        box_id: BoxId,
        retry_count: u32,
        max_retries: u32,
    },

    /// Past the deadline; the box has to be cancelled instead of retried.
    #[error("box {box_id} request expired at {expires_at}")]
    RequestExpired { box_id: BoxId, expires_at: u64 },

    #[error("box {box_id} not expired until {expires_at} (now {now})")]
    NotExpired {
        box_id: BoxId,
        expires_at: u64,
        now: u64,
    },

    /// The ledger disagreed with our read twice in a row.
    #[error("box {box_id} changed underneath the request (now {status})")]
    StaleState { box_id: BoxId, status: BoxStatus },

    /// The transaction was accepted but no known event carried a request id.
    #[error("no request id in receipt {tx_hash} for box {box_id}")]
    RequestIdNotFound { box_id: BoxId, tx_hash: TxHash },

    /// Every poll attempt came back empty.
    #[error("gateway decryption timeout for box {box_id} (request {request_id}) after {attempts} attempts")]
    GatewayTimeout {
        box_id: BoxId,
        request_id: RequestId,
        attempts: u32,
    },

    /// The callback did not land within the wait budget.
    #[error("callback timeout for box {box_id} after {elapsed_secs}s (last status {last_status:?})")]
    CallbackTimeout {
        box_id: BoxId,
        last_status: Option<BoxStatus>,
        elapsed_secs: u64,
    },

    /// The box settled in a different terminal status than expected.
    #[error("box {box_id} ended {actual}, expected {expected}")]
    UnexpectedTerminal {
        box_id: BoxId,
        expected: BoxStatus,
        actual: BoxStatus,
    },

    #[error("reveal of box {0} was cancelled")]
    Cancelled(BoxId),

    /// A reveal pipeline for this box is already running.
    #[error("box {0} already has a reveal in flight")]
    InFlight(BoxId),

    #[error(transparent)]
    Mode(#[from] ModeError),

    #[error(transparent)]
    Ledger(LedgerError),
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

impl From<LedgerError> for LifecycleError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::BoxNotFound(box_id) => LifecycleError::BoxNotFound(box_id),
            LedgerError::Unauthorized { caller, action } => {
                LifecycleError::Unauthorized { caller, action }
            }
            LedgerError::AlreadyTerminal { box_id, status } => {
                LifecycleError::AlreadyTerminal { box_id, status }
            }
            LedgerError::InvalidStatus {
                box_id,
                status,
                action,
            } => LifecycleError::InvalidStatus {
                box_id,
                status,
                action,
            },
            LedgerError::RetryLimitExceeded {
                box_id,
                retry_count,
                max_retries,
            } => LifecycleError::RetryLimitExceeded {
                box_id,
                retry_count,
                max_retries,
            },
            LedgerError::RequestExpired {
                box_id, expires_at, ..
            } => LifecycleError::RequestExpired { box_id, expires_at },
            LedgerError::NotExpired {
                box_id,
                expires_at,
                now,
            } => LifecycleError::NotExpired {
                box_id,
                expires_at,
                now,
            },
            other => LifecycleError::Ledger(other),
        }
    }
}

impl LifecycleError {
    /// Retrying the same call later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LifecycleError::GatewayTimeout { .. }
                | LifecycleError::CallbackTimeout { .. }
                | LifecycleError::InFlight(_)
                | LifecycleError::Ledger(LedgerError::Transport(_))
        )
    }
}
