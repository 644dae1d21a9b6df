//! Guarded box transitions.
//!
//! [`BoxStatus::apply`] defines which edges exist; this module adds the
//! guards that depend on data outside the status: the live request id, the
//! retry budget and the deadline. Every method validates before it mutates,
//! so a rejected transition leaves the record untouched.

use cipherbox_types::boxes::Transition;
use cipherbox_types::{BoxInfo, BoxStatus, ExecutionMode, LedgerConstants, RequestId, Wei};
use serde::{Deserialize, Serialize};

use crate::{LedgerError, Result};

/// Ledger-side box state: the public view plus fields clients never read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxRecord {
    pub info: BoxInfo,
    /// Sealed prize (encrypted ledger) or clear prize (plaintext ledger).
    /// Only ever surfaced through `info.revealed_prize_amount`.
    pub sealed_prize: Wei,
    /// What the buyer paid; refunded on expiry.
    pub price_paid: Wei,
}

impl BoxRecord {
    fn next(
        &self,
        transition: Transition,
        mode: ExecutionMode,
        action: &'static str,
    ) -> Result<BoxStatus> {
        let status = self.info.status;
        if let Some(next) = status.apply(transition, mode) {
            return Ok(next);
        }
        if status.is_terminal() {
            Err(LedgerError::AlreadyTerminal {
                box_id: self.info.box_id,
                status,
            })
        } else {
            Err(LedgerError::InvalidStatus {
                box_id: self.info.box_id,
                status,
                action,
            })
        }
    }

    fn expect_live(&self, request_id: RequestId) -> Result<()> {
        if self.info.current_request != Some(request_id) {
            return Err(LedgerError::StaleRequest(request_id));
        }
        Ok(())
    }

    /// Encrypted open: record `request_id` as the live request and start
    /// the deadline.
    pub fn open_encrypted(
        &mut self,
        request_id: RequestId,
        now: u64,
        constants: &LedgerConstants,
    ) -> Result<()> {
        let next = self.next(Transition::SubmitOpen, ExecutionMode::Encrypted, "open")?;
        self.info.status = next;
        self.info.current_request = Some(request_id);
        self.info.expires_at = Some(now.saturating_add(constants.request_timeout_secs));
        Ok(())
    }

    /// Plaintext open: the stored prize is revealed immediately.
    pub fn open_plaintext(&mut self) -> Result<Wei> {
        let next = self.next(Transition::PlaintextOpen, ExecutionMode::Plaintext, "open")?;
        self.info.status = next;
        self.info.revealed_prize_amount = Some(self.sealed_prize);
        Ok(self.sealed_prize)
    }

    /// Oracle acknowledgement. Repeating it for the live request is a no-op.
    pub fn acknowledge(&mut self, request_id: RequestId) -> Result<()> {
        self.expect_live(request_id)?;
        if self.info.status == BoxStatus::Decrypting {
            return Ok(());
        }
        let next = self.next(Transition::OracleAck, ExecutionMode::Encrypted, "acknowledge")?;
        self.info.status = next;
        Ok(())
    }

    /// Oracle callback: reveal the prize for the live request.
    pub fn finalize(&mut self, request_id: RequestId, cleartext: Wei) -> Result<()> {
        self.expect_live(request_id)?;
        let next = self.next(
            Transition::CallbackFinalize,
            ExecutionMode::Encrypted,
            "finalize decryption",
        )?;
        self.info.status = next;
        self.info.revealed_prize_amount = Some(cleartext);
        Ok(())
    }

    /// Supersede the live request (which has used `retry_count` retries)
    /// with `new_request`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::AlreadyTerminal`] / [`LedgerError::InvalidStatus`] if
    ///   no request is outstanding
    /// - [`LedgerError::RequestExpired`] if the deadline has passed
    /// - [`LedgerError::RetryLimitExceeded`] if the budget is used up
    pub fn retry(
        &mut self,
        retry_count: u32,
        new_request: RequestId,
        now: u64,
        constants: &LedgerConstants,
    ) -> Result<()> {
        let next = self.next(Transition::Retry, ExecutionMode::Encrypted, "retry")?;
        if let Some(expires_at) = self.info.expires_at {
            if now >= expires_at {
                return Err(LedgerError::RequestExpired {
                    box_id: self.info.box_id,
                    expires_at,
                    now,
                });
            }
        }
        if retry_count >= constants.max_retries {
            return Err(LedgerError::RetryLimitExceeded {
                box_id: self.info.box_id,
                retry_count,
                max_retries: constants.max_retries,
            });
        }

        self.info.status = next;
        self.info.current_request = Some(new_request);
        self.info.expires_at = Some(now.saturating_add(constants.request_timeout_secs));
        Ok(())
    }

    /// Expire a box whose deadline has passed.
    pub fn cancel_expired(&mut self, now: u64) -> Result<()> {
        let next = self.next(
            Transition::CancelExpired,
            ExecutionMode::Encrypted,
            "cancel",
        )?;
        let expires_at = self.info.expires_at.unwrap_or(u64::MAX);
        if now < expires_at {
            return Err(LedgerError::NotExpired {
                box_id: self.info.box_id,
                expires_at,
                now,
            });
        }
        self.info.status = next;
        Ok(())
    }

    /// Force the box open without the oracle.
    pub fn emergency_resolve(&mut self, prize_amount: Wei) -> Result<()> {
        let next = self.next(
            Transition::EmergencyResolve,
            ExecutionMode::Encrypted,
            "emergency resolve",
        )?;
        self.info.status = next;
        self.info.revealed_prize_amount = Some(prize_amount);
        Ok(())
    }

    /// Mark the prize paid out. Returns the amount to transfer.
    pub fn withdraw(&mut self, mode: ExecutionMode) -> Result<Wei> {
        let next = self.next(Transition::Withdraw, mode, "withdraw")?;
        let amount = self.info.revealed_prize_amount.unwrap_or_default();
        self.info.status = next;
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use cipherbox_types::Address;

    use super::*;

    fn record() -> BoxRecord {
        BoxRecord {
            info: BoxInfo {
                box_id: 7,
                series_id: 1,
                owner: Address([0x01; 20]),
                status: BoxStatus::Purchased,
                revealed_prize_amount: None,
                purchase_time: 1_000,
                expires_at: None,
                current_request: None,
            },
            sealed_prize: 500,
            price_paid: 400,
        }
    }

    #[test]
    fn test_open_sets_deadline() {
        let constants = LedgerConstants::default();
        let mut rec = record();
        rec.open_encrypted(RequestId::from_u64(1), 1_000, &constants)
            .expect("open");
        assert_eq!(rec.info.status, BoxStatus::PendingDecrypt);
        assert_eq!(rec.info.expires_at, Some(1_000 + constants.request_timeout_secs));
        assert_eq!(rec.info.current_request, Some(RequestId::from_u64(1)));
        assert!(rec.info.revealed_prize_amount.is_none());
    }

    #[test]
    fn test_second_open_rejected() {
        let constants = LedgerConstants::default();
        let mut rec = record();
        rec.open_encrypted(RequestId::from_u64(1), 1_000, &constants)
            .expect("open");
        let err = rec
            .open_encrypted(RequestId::from_u64(2), 1_001, &constants)
            .expect_err("second open");
        assert!(matches!(err, LedgerError::InvalidStatus { .. }));
        assert_eq!(rec.info.current_request, Some(RequestId::from_u64(1)));
    }

    #[test]
    fn test_finalize_requires_live_request() {
        let constants = LedgerConstants::default();
        let mut rec = record();
        rec.open_encrypted(RequestId::from_u64(1), 1_000, &constants)
            .expect("open");
        let err = rec
            .finalize(RequestId::from_u64(99), 500)
            .expect_err("stale");
        assert_eq!(err, LedgerError::StaleRequest(RequestId::from_u64(99)));

        rec.acknowledge(RequestId::from_u64(1)).expect("ack");
        rec.acknowledge(RequestId::from_u64(1)).expect("repeat ack");
        rec.finalize(RequestId::from_u64(1), 500).expect("finalize");
        assert_eq!(rec.info.status, BoxStatus::Opened);
        assert_eq!(rec.info.revealed_prize_amount, Some(500));
    }

    #[test]
    fn test_retry_resets_deadline() {
        let constants = LedgerConstants::default();
        let mut rec = record();
        rec.open_encrypted(RequestId::from_u64(1), 1_000, &constants)
            .expect("open");
        rec.retry(0, RequestId::from_u64(2), 1_500, &constants)
            .expect("retry");
        assert_eq!(rec.info.current_request, Some(RequestId::from_u64(2)));
        assert_eq!(rec.info.expires_at, Some(1_500 + constants.request_timeout_secs));
    }

    #[test]
    fn test_retry_limit_leaves_state_unchanged() {
        let constants = LedgerConstants::default();
        let mut rec = record();
        rec.open_encrypted(RequestId::from_u64(1), 1_000, &constants)
            .expect("open");
        rec.acknowledge(RequestId::from_u64(1)).expect("ack");
        let before = rec.clone();

        let err = rec
            .retry(constants.max_retries, RequestId::from_u64(2), 1_100, &constants)
            .expect_err("limit");
        assert!(matches!(err, LedgerError::RetryLimitExceeded { .. }));
        assert_eq!(rec, before);
    }

    #[test]
    fn test_retry_after_deadline_rejected() {
        let constants = LedgerConstants::default();
        let mut rec = record();
        rec.open_encrypted(RequestId::from_u64(1), 1_000, &constants)
            .expect("open");
        let deadline = 1_000 + constants.request_timeout_secs;
        let err = rec
            .retry(0, RequestId::from_u64(2), deadline, &constants)
            .expect_err("expired");
        assert!(matches!(err, LedgerError::RequestExpired { .. }));
    }

    #[test]
    fn test_cancel_expired_boundary() {
        let constants = LedgerConstants::default();
        let mut rec = record();
        rec.open_encrypted(RequestId::from_u64(1), 1_000, &constants)
            .expect("open");
        let deadline = 1_000 + constants.request_timeout_secs;

        let err = rec.cancel_expired(deadline - 1).expect_err("early");
        assert!(matches!(err, LedgerError::NotExpired { .. }));
        assert_eq!(rec.info.status, BoxStatus::PendingDecrypt);

        rec.cancel_expired(deadline).expect("cancel at deadline");
        assert_eq!(rec.info.status, BoxStatus::Expired);
    }

    #[test]
    fn test_cancel_purchased_box_rejected() {
        let mut rec = record();
        let err = rec.cancel_expired(u64::MAX).expect_err("no request");
        assert!(matches!(err, LedgerError::InvalidStatus { .. }));
    }

    #[test]
    fn test_emergency_resolve_from_purchased() {
        let mut rec = record();
        rec.emergency_resolve(42).expect("resolve");
        assert_eq!(rec.info.status, BoxStatus::Opened);
        assert_eq!(rec.info.revealed_prize_amount, Some(42));

        let err = rec.emergency_resolve(43).expect_err("terminal");
        assert!(matches!(err, LedgerError::AlreadyTerminal { .. }));
        assert_eq!(rec.info.revealed_prize_amount, Some(42));
    }

    #[test]
    fn test_withdraw_once() {
        let mut rec = record();
        rec.emergency_resolve(42).expect("resolve");
        assert_eq!(rec.withdraw(ExecutionMode::Encrypted).expect("withdraw"), 42);
        assert_eq!(rec.info.status, BoxStatus::PrizeWithdrawn);

        let err = rec.withdraw(ExecutionMode::Encrypted).expect_err("second withdraw");
        assert!(matches!(err, LedgerError::AlreadyTerminal { .. }));
        assert_eq!(rec.info.revealed_prize_amount, Some(42));
    }

    #[test]
    fn test_plaintext_open_reveals() {
        let mut rec = record();
        assert_eq!(rec.open_plaintext().expect("open"), 500);
        assert_eq!(rec.info.status, BoxStatus::Opened);
        assert_eq!(rec.info.revealed_prize_amount, Some(500));
    }
}
