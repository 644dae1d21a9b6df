//! Open request submission.
//!
//! Contract versions disagree on the submission event: newer ones emit
//! `BoxOpenRequested`, older ones `DecryptionRequested`. Both are accepted;
//! a receipt carrying neither yields [`LifecycleError::RequestIdNotFound`].

use std::sync::Arc;

use cipherbox_ledger::{Ledger, LedgerError};
use cipherbox_types::{
    Address, BoxId, BoxInfo, BoxStatus, ExecutionMode, LedgerEvent, RequestId, TxReceipt, Wei,
};

use crate::{LifecycleError, Result};

/// Request id announced by a submission receipt, if any.
pub fn extract_request_id(receipt: &TxReceipt) -> Option<RequestId> {
    let events: Vec<LedgerEvent> = receipt.events().collect();
    events
        .iter()
        .find_map(|e| match e {
            LedgerEvent::BoxOpenRequested { request_id, .. } => Some(*request_id),
            _ => None,
        })
        .or_else(|| {
            events.iter().find_map(|e| match e {
                LedgerEvent::DecryptionRequested { request_id, .. } => Some(*request_id),
                _ => None,
            })
        })
}

#[derive(Clone, Debug, PartialEq)]
pub enum Submission {
    /// A new request was recorded on the ledger.
    Submitted {
        request_id: RequestId,
        receipt: TxReceipt,
    },
    /// The box already had a live request; nothing was sent.
    Resumed { request_id: RequestId },
    /// Plaintext ledger: the prize is known immediately.
    Revealed { prize: Wei },
}

impl Submission {
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Submission::Submitted { request_id, .. } | Submission::Resumed { request_id } => {
                Some(*request_id)
            }
            Submission::Revealed { .. } => None,
        }
    }
}

pub struct RequestSubmitter {
    ledger: Arc<dyn Ledger>,
}

impl RequestSubmitter {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Submit the open request for `box_id`, or resume the one in flight.
    pub async fn submit_open_request(&self, caller: Address, box_id: BoxId) -> Result<Submission> {
        let info = self.ledger.get_box_info(box_id).await?;
        if info.owner != caller {
            return Err(LifecycleError::Unauthorized {
                caller,
                action: "open box",
            });
        }

        match info.status {
            BoxStatus::Purchased => {}
            status if status.is_awaiting_decryption() => return self.resume(&info),
            status => return Err(LifecycleError::AlreadyTerminal { box_id, status }),
        }

        let receipt = match self.ledger.open_box(caller, box_id).await {
            Ok(receipt) => receipt,
            Err(LedgerError::InvalidStatus { .. } | LedgerError::AlreadyTerminal { .. }) => {
                return self.reconcile(box_id).await;
            }
            Err(e) => return Err(e.into()),
        };

        match self.ledger.mode() {
            ExecutionMode::Plaintext => {
                let opened = receipt.events().find_map(|e| match e {
                    LedgerEvent::BoxOpened { prize_amount, .. } => Some(prize_amount),
                    _ => None,
                });
                let prize = match opened {
                    Some(prize) => prize,
                    None => self
                        .ledger
                        .get_box_info(box_id)
                        .await?
                        .revealed_prize_amount
                        .unwrap_or_default(),
                };
                tracing::info!(box_id, prize = %prize, "box opened");
                Ok(Submission::Revealed { prize })
            }
            ExecutionMode::Encrypted => {
                let request_id =
                    extract_request_id(&receipt).ok_or(LifecycleError::RequestIdNotFound {
                        box_id,
                        tx_hash: receipt.tx_hash,
                    })?;
                tracing::info!(box_id, request_id = %request_id, tx = %receipt.tx_hash, "open request submitted");
                Ok(Submission::Submitted {
                    request_id,
                    receipt,
                })
            }
        }
    }

    fn resume(&self, info: &BoxInfo) -> Result<Submission> {
        let request_id = info
            .current_request
            .ok_or(LifecycleError::StaleState {
                box_id: info.box_id,
                status: info.status,
            })?;
        tracing::info!(box_id = info.box_id, request_id = %request_id, "resuming outstanding request");
        Ok(Submission::Resumed { request_id })
    }

    /// The ledger rejected the open although our read said `PURCHASED`:
    /// re-read once and go with what the ledger says now.
    async fn reconcile(&self, box_id: BoxId) -> Result<Submission> {
        let info = self.ledger.get_box_info(box_id).await?;
        tracing::debug!(box_id, status = %info.status, "open rejected; re-read box");
        if info.status.is_awaiting_decryption() {
            return self.resume(&info);
        }
        if info.status.is_terminal() {
            return Err(LifecycleError::AlreadyTerminal {
                box_id,
                status: info.status,
            });
        }
        Err(LifecycleError::StaleState {
            box_id,
            status: info.status,
        })
    }
}
