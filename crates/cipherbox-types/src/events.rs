//! Ledger events and transaction receipts.
//!
//! Receipts carry raw [`EventLog`]s (a name plus JSON arguments) because
//! contract versions differ in which events they emit and how they encode
//! arguments. [`LedgerEvent`] is the typed view: decoding is an adjacently
//! tagged serde parse keyed on the event name, so an unknown name or a
//! malformed argument set simply fails to decode instead of panicking.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::{Address, BoxId, RequestId, SeriesId, TxHash, Wei};

/// A raw event as emitted by the ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    pub name: String,
    pub args: serde_json::Value,
}

impl EventLog {
    /// Encode a typed event into its raw form.
    pub fn from_event(event: &LedgerEvent) -> Self {
        match serde_json::to_value(event) {
            Ok(serde_json::Value::Object(mut map)) => Self {
                name: map
                    .remove("name")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default(),
                args: map.remove("args").unwrap_or(serde_json::Value::Null),
            },
            _ => Self {
                name: String::new(),
                args: serde_json::Value::Null,
            },
        }
    }

    /// Decode into a typed event. `None` for unknown names or bad arguments.
    pub fn decode(&self) -> Option<LedgerEvent> {
        let tagged = serde_json::json!({ "name": self.name, "args": self.args });
        serde_json::from_value(tagged).ok()
    }
}

/// Typed ledger events.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "args")]
pub enum LedgerEvent {
    SeriesCreated {
        series_id: SeriesId,
        name: String,
        #[serde_as(as = "DisplayFromStr")]
        price: Wei,
        total_boxes: u32,
    },
    BoxPurchased {
        box_id: BoxId,
        series_id: SeriesId,
        buyer: Address,
    },
    /// Submission event emitted by newer contract versions.
    BoxOpenRequested {
        #[serde(alias = "boxId")]
        box_id: BoxId,
        owner: Address,
        #[serde(alias = "requestId")]
        request_id: RequestId,
    },
    /// Submission event emitted by older contract versions.
    DecryptionRequested {
        #[serde(alias = "boxId")]
        box_id: BoxId,
        #[serde(alias = "requestId")]
        request_id: RequestId,
    },
    DecryptionAcknowledged {
        box_id: BoxId,
        request_id: RequestId,
    },
    DecryptionCompleted {
        box_id: BoxId,
        request_id: RequestId,
        #[serde_as(as = "DisplayFromStr")]
        prize_amount: Wei,
    },
    DecryptionFailed {
        box_id: BoxId,
        request_id: RequestId,
        reason: String,
    },
    DecryptionRetrying {
        #[serde(alias = "boxId")]
        box_id: BoxId,
        previous_request_id: RequestId,
        #[serde(alias = "requestId", alias = "newRequestId")]
        request_id: RequestId,
        retry_count: u32,
    },
    BoxExpired {
        box_id: BoxId,
        owner: Address,
        #[serde_as(as = "DisplayFromStr")]
        refund: Wei,
    },
    BoxOpened {
        box_id: BoxId,
        owner: Address,
        #[serde_as(as = "DisplayFromStr")]
        prize_amount: Wei,
    },
    EmergencyResolved {
        box_id: BoxId,
        resolver: Address,
        #[serde_as(as = "DisplayFromStr")]
        prize_amount: Wei,
    },
    PrizeWithdrawn {
        box_id: BoxId,
        owner: Address,
        #[serde_as(as = "DisplayFromStr")]
        amount: Wei,
    },
    PrizeFundDeposited {
        from: Address,
        #[serde_as(as = "DisplayFromStr")]
        amount: Wei,
    },
}

impl LedgerEvent {
    /// The event name as it appears in logs.
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::SeriesCreated { .. } => "SeriesCreated",
            LedgerEvent::BoxPurchased { .. } => "BoxPurchased",
            LedgerEvent::BoxOpenRequested { .. } => "BoxOpenRequested",
            LedgerEvent::DecryptionRequested { .. } => "DecryptionRequested",
            LedgerEvent::DecryptionAcknowledged { .. } => "DecryptionAcknowledged",
            LedgerEvent::DecryptionCompleted { .. } => "DecryptionCompleted",
            LedgerEvent::DecryptionFailed { .. } => "DecryptionFailed",
            LedgerEvent::DecryptionRetrying { .. } => "DecryptionRetrying",
            LedgerEvent::BoxExpired { .. } => "BoxExpired",
            LedgerEvent::BoxOpened { .. } => "BoxOpened",
            LedgerEvent::EmergencyResolved { .. } => "EmergencyResolved",
            LedgerEvent::PrizeWithdrawn { .. } => "PrizeWithdrawn",
            LedgerEvent::PrizeFundDeposited { .. } => "PrizeFundDeposited",
        }
    }
}

/// Receipt of an accepted ledger transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    /// Unix seconds of the block that included the transaction.
    pub block_time: u64,
    pub logs: Vec<EventLog>,
}

impl TxReceipt {
    /// Decode every log that matches a known event, in emission order.
    pub fn events(&self) -> impl Iterator<Item = LedgerEvent> + '_ {
        self.logs.iter().filter_map(EventLog::decode)
    }
}
