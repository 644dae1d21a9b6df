//! Box, decryption request and series structures, plus the box status
//! state machine.
//!
//! ## Status graph (encrypted ledger)
//!
//! ```text
//! PURCHASED --(open)--> PENDING_DECRYPT --(oracle ack)--> DECRYPTING --(callback)--> OPENED
//! PENDING_DECRYPT --(callback)--> OPENED
//! PENDING_DECRYPT|DECRYPTING --(retry)--> PENDING_DECRYPT
//! PENDING_DECRYPT|DECRYPTING --(cancel expired)--> EXPIRED
//! OPENED --(withdraw)--> PRIZE_WITHDRAWN
//! any non-terminal --(emergency resolve)--> OPENED
//! ```
//!
//! The plaintext ledger has a single extra edge, `PURCHASED --(open)--> OPENED`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::{
    Address, BoxId, ExecutionMode, RequestId, SeriesId, TypesError, Wei,
    DEFAULT_CALLBACK_GAS_LIMIT, DEFAULT_MAX_RETRIES, DEFAULT_REQUEST_TIMEOUT_SECS,
};

/// Lifecycle status of a box.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BoxStatus {
    Purchased,
    PendingDecrypt,
    Decrypting,
    Opened,
    PrizeWithdrawn,
    Expired,
}

/// The event that drives a status change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Owner submitted the open request.
    SubmitOpen,
    /// Oracle acknowledged it is processing the request.
    OracleAck,
    /// The oracle callback finalized the reveal on the ledger.
    CallbackFinalize,
    /// A stalled request was superseded by a fresh one.
    Retry,
    /// The deadline passed and the box was cancelled.
    CancelExpired,
    /// The owner withdrew the revealed prize.
    Withdraw,
    /// Contract owner forced the box open without the oracle.
    EmergencyResolve,
    /// Plaintext ledger: open reveals the prize immediately.
    PlaintextOpen,
}

impl BoxStatus {
    /// Stable name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            BoxStatus::Purchased => "PURCHASED",
            BoxStatus::PendingDecrypt => "PENDING_DECRYPT",
            BoxStatus::Decrypting => "DECRYPTING",
            BoxStatus::Opened => "OPENED",
            BoxStatus::PrizeWithdrawn => "PRIZE_WITHDRAWN",
            BoxStatus::Expired => "EXPIRED",
        }
    }

    /// Terminal for decryption purposes: no further requests may be created.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BoxStatus::Opened | BoxStatus::PrizeWithdrawn | BoxStatus::Expired
        )
    }

    /// No transition of any kind leaves this status.
    pub fn is_final(&self) -> bool {
        matches!(self, BoxStatus::PrizeWithdrawn | BoxStatus::Expired)
    }

    /// A decryption request is outstanding.
    pub fn is_awaiting_decryption(&self) -> bool {
        matches!(self, BoxStatus::PendingDecrypt | BoxStatus::Decrypting)
    }

    /// Whether `revealed_prize_amount` is populated in this status.
    pub fn has_revealed_prize(&self) -> bool {
        matches!(self, BoxStatus::Opened | BoxStatus::PrizeWithdrawn)
    }

    /// Apply a transition under the given ledger mode.
    ///
    /// Returns the next status, or `None` if the edge does not exist. Guards
    /// that depend on data outside the status (retry budget, deadline,
    /// caller identity) are checked by the ledger, not here.
    pub fn apply(self, transition: Transition, mode: ExecutionMode) -> Option<BoxStatus> {
        use BoxStatus::*;
        use Transition::*;

        match (mode, self, transition) {
            (ExecutionMode::Encrypted, Purchased, SubmitOpen) => Some(PendingDecrypt),
            (ExecutionMode::Encrypted, PendingDecrypt, OracleAck) => Some(Decrypting),
            (ExecutionMode::Encrypted, PendingDecrypt | Decrypting, CallbackFinalize) => {
                Some(Opened)
            }
            (ExecutionMode::Encrypted, PendingDecrypt | Decrypting, Retry) => Some(PendingDecrypt),
            (ExecutionMode::Encrypted, PendingDecrypt | Decrypting, CancelExpired) => {
                Some(Expired)
            }
            (ExecutionMode::Encrypted, Purchased | PendingDecrypt | Decrypting, EmergencyResolve) => {
                Some(Opened)
            }
            (ExecutionMode::Plaintext, Purchased, PlaintextOpen) => Some(Opened),
            (_, Opened, Withdraw) => Some(PrizeWithdrawn),
            _ => None,
        }
    }
}

impl fmt::Display for BoxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BoxStatus {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PURCHASED" => Ok(BoxStatus::Purchased),
            "PENDING_DECRYPT" => Ok(BoxStatus::PendingDecrypt),
            "DECRYPTING" => Ok(BoxStatus::Decrypting),
            "OPENED" => Ok(BoxStatus::Opened),
            "PRIZE_WITHDRAWN" => Ok(BoxStatus::PrizeWithdrawn),
            "EXPIRED" => Ok(BoxStatus::Expired),
            other => Err(TypesError::UnknownVariant {
                kind: "box status",
                value: other.to_string(),
            }),
        }
    }
}

/// Ledger view of one box, as returned by `getBoxInfo`.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxInfo {
    pub box_id: BoxId,
    pub series_id: SeriesId,
    pub owner: Address,
    pub status: BoxStatus,
    /// Populated only once the box is opened.
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub revealed_prize_amount: Option<Wei>,
    /// Unix seconds.
    pub purchase_time: u64,
    /// Deadline for the outstanding request; `None` before the first open.
    #[serde(default)]
    pub expires_at: Option<u64>,
    /// The live (non-superseded) decryption request, if any.
    #[serde(default)]
    pub current_request: Option<RequestId>,
}

impl BoxInfo {
    /// Whether the outstanding request deadline has passed at `now`.
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// One attempt to reveal a box's prize.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionRequest {
    pub request_id: RequestId,
    pub box_id: BoxId,
    pub requester: Address,
    /// Unix seconds at submission.
    pub submitted_at: u64,
    /// 0 for the initial request, incremented on every retry.
    pub retry_count: u32,
    /// The oracle answered (successfully or with a failure report).
    pub processed: bool,
    /// Replaced by a retry, or made moot by cancellation or emergency resolution.
    #[serde(default)]
    pub superseded: bool,
}

impl DecryptionRequest {
    /// Whether the oracle may still answer this request.
    pub fn is_live(&self) -> bool {
        !self.processed && !self.superseded
    }
}

/// A purchasable series of boxes.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxSeries {
    pub id: SeriesId,
    pub name: String,
    #[serde_as(as = "DisplayFromStr")]
    pub price: Wei,
    pub total_boxes: u32,
    pub remaining_boxes: u32,
    pub creator: Address,
    pub is_active: bool,
}

impl BoxSeries {
    /// Whether another box can be bought from this series.
    pub fn is_available(&self) -> bool {
        self.is_active && self.remaining_boxes > 0
    }
}

/// Read-only ledger constants. The orchestrator fetches these from the
/// ledger rather than hardcoding them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConstants {
    pub callback_gas_limit: u64,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for LedgerConstants {
    fn default() -> Self {
        Self {
            callback_gas_limit: DEFAULT_CALLBACK_GAS_LIMIT,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}
