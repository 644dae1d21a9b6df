//! Recovery for stalled decryptions: retry, cancel after expiry, or an
//! owner-forced resolution.
//!
//! Ledger constants are fetched once and cached for the coordinator's
//! lifetime.

use std::sync::Arc;

use cipherbox_ledger::Ledger;
use cipherbox_types::{Address, BoxId, LedgerConstants, LedgerEvent, RequestId, TxReceipt, Wei};
use serde::Serialize;
use tokio::sync::OnceCell;

use crate::{LifecycleError, Result};

/// What to do with a box whose reveal stalled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStep {
    /// Deadline not reached and retries left.
    Retry,
    /// Retries exhausted; wait for the deadline, then cancel.
    AwaitExpiry { expires_at: u64 },
    /// Deadline passed.
    CancelExpired,
    /// No outstanding request.
    Nothing,
}

pub struct RetryCoordinator {
    ledger: Arc<dyn Ledger>,
    constants: OnceCell<LedgerConstants>,
}

impl RetryCoordinator {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self {
            ledger,
            constants: OnceCell::new(),
        }
    }

    pub async fn constants(&self) -> Result<LedgerConstants> {
        let constants = self
            .constants
            .get_or_try_init(|| async { self.ledger.constants().await })
            .await?;
        Ok(*constants)
    }

    /// Decide how to recover `box_id` at ledger time `now`.
    pub async fn next_step(&self, box_id: BoxId, now: u64) -> Result<RecoveryStep> {
        let constants = self.constants().await?;
        let info = self.ledger.get_box_info(box_id).await?;
        if !info.status.is_awaiting_decryption() {
            return Ok(RecoveryStep::Nothing);
        }
        let expires_at = info.expires_at.unwrap_or(u64::MAX);
        if now >= expires_at {
            return Ok(RecoveryStep::CancelExpired);
        }
        let retry_count = match info.current_request {
            Some(id) => self.ledger.get_decryption_request(id).await?.retry_count,
            None => 0,
        };
        if retry_count >= constants.max_retries {
            Ok(RecoveryStep::AwaitExpiry { expires_at })
        } else {
            Ok(RecoveryStep::Retry)
        }
    }

    /// Supersede the live request. Returns the new request id.
    pub async fn retry(&self, caller: Address, box_id: BoxId) -> Result<RequestId> {
        let receipt = self.ledger.retry_decryption(caller, box_id).await?;
        let announced = receipt.events().find_map(|e| match e {
            LedgerEvent::DecryptionRetrying {
                request_id,
                retry_count,
                ..
            } => Some((request_id, retry_count)),
            _ => None,
        });

        let request_id = match announced {
            Some((request_id, retry_count)) => {
                tracing::info!(box_id, request_id = %request_id, retry_count, "decryption retried");
                request_id
            }
            None => self
                .ledger
                .get_box_info(box_id)
                .await?
                .current_request
                .ok_or(LifecycleError::RequestIdNotFound {
                    box_id,
                    tx_hash: receipt.tx_hash,
                })?,
        };
        Ok(request_id)
    }

    /// Expire a box past its deadline. Returns the refund paid to the owner.
    pub async fn cancel_expired(&self, caller: Address, box_id: BoxId) -> Result<Wei> {
        let receipt = self.ledger.cancel_expired_box(caller, box_id).await?;
        let refund = receipt
            .events()
            .find_map(|e| match e {
                LedgerEvent::BoxExpired { refund, .. } => Some(refund),
                _ => None,
            })
            .unwrap_or_default();
        tracing::info!(box_id, refund = %refund, "expired box cancelled");
        Ok(refund)
    }

    /// Force-open a box without the oracle. Contract owner only.
    pub async fn emergency_resolve(
        &self,
        caller: Address,
        box_id: BoxId,
        prize_amount: Wei,
    ) -> Result<TxReceipt> {
        let receipt = self
            .ledger
            .emergency_resolve(caller, box_id, prize_amount)
            .await?;
        tracing::warn!(
            box_id,
            caller = %caller,
            prize = %prize_amount,
            tx = %receipt.tx_hash,
            "emergency resolution submitted"
        );
        Ok(receipt)
    }
}
