//! The reveal pipeline.
//!
//! `reveal` resolves the execution path, submits (or resumes) the open
//! request, polls the gateway and waits for the ledger callback. At most one
//! pipeline runs per box; a second concurrent call fails fast with
//! [`LifecycleError::InFlight`]. Distinct boxes proceed independently.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use cipherbox_gateway::{GatewayPoller, ModeSelector, PollOutcome, PollProgress};
use cipherbox_ledger::Ledger;
use cipherbox_types::{Address, BoxId, BoxStatus, ExecutionMode, LedgerEvent, RequestId, Wei};
use serde::Serialize;
use serde_with::{serde_as, DisplayFromStr};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::retry::RetryCoordinator;
use crate::submitter::{RequestSubmitter, Submission};
use crate::waiter::{CallbackWaiter, WaitOptions};
use crate::{LifecycleError, Result};

/// One ledger per execution path.
#[derive(Clone)]
pub struct LedgerSet {
    pub plaintext: Arc<dyn Ledger>,
    pub encrypted: Arc<dyn Ledger>,
}

impl LedgerSet {
    pub fn get(&self, mode: ExecutionMode) -> &Arc<dyn Ledger> {
        match mode {
            ExecutionMode::Plaintext => &self.plaintext,
            ExecutionMode::Encrypted => &self.encrypted,
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RevealReport {
    pub box_id: BoxId,
    pub mode: ExecutionMode,
    /// `None` on the plaintext path.
    pub request_id: Option<RequestId>,
    #[serde_as(as = "DisplayFromStr")]
    pub prize: Wei,
    pub poll_attempts: u32,
}

type InFlightKey = (ExecutionMode, BoxId);

/// Holds a box's in-flight slot until dropped.
struct InFlightGuard<'a> {
    slots: &'a Mutex<HashSet<InFlightKey>>,
    key: InFlightKey,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(slots: &'a Mutex<HashSet<InFlightKey>>, key: InFlightKey) -> Option<Self> {
        let inserted = slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
        inserted.then_some(Self { slots, key })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

pub struct RevealOrchestrator {
    ledgers: LedgerSet,
    modes: Arc<RwLock<ModeSelector>>,
    poller: Arc<GatewayPoller>,
    wait: WaitOptions,
    plaintext_recovery: RetryCoordinator,
    encrypted_recovery: RetryCoordinator,
    in_flight: Mutex<HashSet<InFlightKey>>,
}

impl RevealOrchestrator {
    pub fn new(
        ledgers: LedgerSet,
        modes: Arc<RwLock<ModeSelector>>,
        poller: Arc<GatewayPoller>,
        wait: WaitOptions,
    ) -> Self {
        Self {
            plaintext_recovery: RetryCoordinator::new(ledgers.plaintext.clone()),
            encrypted_recovery: RetryCoordinator::new(ledgers.encrypted.clone()),
            ledgers,
            modes,
            poller,
            wait,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn ledgers(&self) -> &LedgerSet {
        &self.ledgers
    }

    pub fn modes(&self) -> &Arc<RwLock<ModeSelector>> {
        &self.modes
    }

    /// Retry/expiry coordinator for one ledger.
    pub fn recovery(&self, mode: ExecutionMode) -> &RetryCoordinator {
        match mode {
            ExecutionMode::Plaintext => &self.plaintext_recovery,
            ExecutionMode::Encrypted => &self.encrypted_recovery,
        }
    }

    pub fn is_in_flight(&self, mode: ExecutionMode, box_id: BoxId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(mode, box_id))
    }

    /// The path new reveals take right now.
    pub async fn active_mode(&self) -> Result<ExecutionMode> {
        Ok(self.modes.read().await.resolve()?)
    }

    /// Reveal `box_id` on the currently active path.
    pub async fn reveal<F>(
        &self,
        caller: Address,
        box_id: BoxId,
        cancel: &CancellationToken,
        on_progress: F,
    ) -> Result<RevealReport>
    where
        F: FnMut(PollProgress) + Send,
    {
        let mode = self.active_mode().await?;
        self.reveal_on(mode, caller, box_id, cancel, on_progress)
            .await
    }

    /// Reveal `box_id` on an explicit path.
    pub async fn reveal_on<F>(
        &self,
        mode: ExecutionMode,
        caller: Address,
        box_id: BoxId,
        cancel: &CancellationToken,
        on_progress: F,
    ) -> Result<RevealReport>
    where
        F: FnMut(PollProgress) + Send,
    {
        self.modes.read().await.check(mode)?;
        let _slot = InFlightGuard::acquire(&self.in_flight, (mode, box_id))
            .ok_or(LifecycleError::InFlight(box_id))?;

        let ledger = self.ledgers.get(mode).clone();
        let submission = RequestSubmitter::new(ledger.clone())
            .submit_open_request(caller, box_id)
            .await?;

        let request_id = match submission {
            Submission::Revealed { prize } => {
                return Ok(RevealReport {
                    box_id,
                    mode,
                    request_id: None,
                    prize,
                    poll_attempts: 0,
                });
            }
            Submission::Submitted { request_id, .. } | Submission::Resumed { request_id } => {
                request_id
            }
        };

        let outcome = self
            .poller
            .poll_decryption(request_id, ledger.contract_address(), cancel, on_progress)
            .await;
        let attempts = match outcome {
            PollOutcome::Decrypted { attempts, .. } => attempts,
            PollOutcome::TimedOut { attempts } => {
                return Err(LifecycleError::GatewayTimeout {
                    box_id,
                    request_id,
                    attempts,
                });
            }
            PollOutcome::Cancelled { .. } => return Err(LifecycleError::Cancelled(box_id)),
        };

        let info = CallbackWaiter::new(ledger, self.wait)
            .wait_for_terminal(box_id, BoxStatus::Opened, cancel)
            .await?;
        let prize = info.revealed_prize_amount.unwrap_or_default();
        tracing::info!(box_id, request_id = %request_id, prize = %prize, attempts, "reveal complete");

        Ok(RevealReport {
            box_id,
            mode,
            request_id: Some(request_id),
            prize,
            poll_attempts: attempts,
        })
    }

    /// Withdraw the revealed prize of a box. The path is always explicit:
    /// box ids are numbered per ledger, so the active path may name a
    /// different box. Returns the amount paid out.
    pub async fn withdraw(
        &self,
        mode: ExecutionMode,
        caller: Address,
        box_id: BoxId,
    ) -> Result<Wei> {
        let ledger = self.ledgers.get(mode);
        let info = ledger.get_box_info(box_id).await?;
        if info.owner != caller {
            return Err(LifecycleError::Unauthorized {
                caller,
                action: "withdraw prize",
            });
        }
        match info.status {
            BoxStatus::Opened => {}
            status if status.is_final() => {
                return Err(LifecycleError::AlreadyTerminal { box_id, status });
            }
            status => {
                return Err(LifecycleError::InvalidStatus {
                    box_id,
                    status,
                    action: "withdraw prize",
                });
            }
        }

        let receipt = ledger.withdraw_prize(caller, box_id).await?;
        let amount = receipt
            .events()
            .find_map(|e| match e {
                LedgerEvent::PrizeWithdrawn { amount, .. } => Some(amount),
                _ => None,
            })
            .or(info.revealed_prize_amount)
            .unwrap_or_default();
        tracing::info!(box_id, amount = %amount, "prize withdrawn");
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use cipherbox_gateway::{DecryptRequest, GatewayClient, GatewayReply, PollOptions};
    use cipherbox_ledger::{
        ContractConfig, ManualClock, MemoryStore, OracleCallback, ReferenceLedger,
    };
    use cipherbox_types::GatewayStatus;

    use super::*;

    const OWNER: Address = Address([0x0f; 20]);
    const ALICE: Address = Address([0xa1; 20]);

    /// Gateway that decrypts through the reference ledger and lands the
    /// callback before answering.
    struct LocalOracle {
        ledger: Arc<ReferenceLedger<MemoryStore>>,
        ready_after: u32,
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl GatewayClient for LocalOracle {
        async fn public_decrypt(
            &self,
            request: &DecryptRequest,
        ) -> cipherbox_gateway::Result<GatewayReply> {
            let call = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
                + 1;
            if call < self.ready_after {
                return Ok(GatewayReply::new(404, ""));
            }
            let request_id: RequestId = request.handle.parse().expect("handle");
            let prize = self
                .ledger
                .sealed_prize_for(request_id)
                .await
                .expect("sealed");
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
            Ok(GatewayReply::new(200, format!("0x04{}", "00".repeat(64))))
        }
    }

    async fn ledger(mode: ExecutionMode) -> Arc<ReferenceLedger<MemoryStore>> {
        let ledger = Arc::new(ReferenceLedger::new(
            ContractConfig::new(Address([0xcc; 20]), OWNER, mode),
            MemoryStore::new(),
            Arc::new(ManualClock::new(0)),
        ));
        ledger
            .create_series(OWNER, "Genesis", 100, 5)
            .await
            .expect("series");
        ledger
            .deposit_prize_fund(OWNER, 1_000)
            .await
            .expect("fund");
        for prize in [140, 60] {
            ledger
                .purchase_box(ALICE, 1, 100, prize)
                .await
                .expect("purchase");
        }
        ledger
    }

    async fn orchestrator(ready_after: u32) -> (RevealOrchestrator, Arc<ReferenceLedger<MemoryStore>>) {
        let encrypted = ledger(ExecutionMode::Encrypted).await;
        let plaintext = ledger(ExecutionMode::Plaintext).await;
        let oracle = Arc::new(LocalOracle {
            ledger: encrypted.clone(),
            ready_after,
            calls: std::sync::atomic::AtomicU32::new(0),
        });
        let poller = Arc::new(GatewayPoller::new(oracle, 31_337, PollOptions::default()));
        let mut selector = ModeSelector::new();
        selector.on_health_transition(GatewayStatus::Up);
        let orchestrator = RevealOrchestrator::new(
            LedgerSet {
                plaintext,
                encrypted: encrypted.clone(),
            },
            Arc::new(RwLock::new(selector)),
            poller,
            WaitOptions::default(),
        );
        (orchestrator, encrypted)
    }

    #[tokio::test(start_paused = true)]
    async fn test_encrypted_reveal_end_to_end() {
        let (orchestrator, encrypted) = orchestrator(3).await;
        let mut seen = Vec::new();
        let report = orchestrator
            .reveal(ALICE, 1, &CancellationToken::new(), |p| seen.push(p.current))
            .await
            .expect("reveal");

        assert_eq!(report.mode, ExecutionMode::Encrypted);
        assert_eq!(report.prize, 140);
        assert_eq!(report.poll_attempts, 3);
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(report.request_id.is_some());
        assert!(!orchestrator.is_in_flight(ExecutionMode::Encrypted, 1));

        assert_eq!(
            orchestrator
                .withdraw(ExecutionMode::Encrypted, ALICE, 1)
                .await
                .expect("withdraw"),
            140
        );
        let err = orchestrator
            .withdraw(ExecutionMode::Encrypted, ALICE, 1)
            .await
            .expect_err("second withdraw");
        assert!(matches!(err, LifecycleError::AlreadyTerminal { .. }));
        assert_eq!(
            encrypted
                .get_box_info(1)
                .await
                .expect("info")
                .revealed_prize_amount,
            Some(140)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_plaintext_reveal_when_gateway_down() {
        let (orchestrator, _) = orchestrator(1).await;
        orchestrator
            .modes()
            .write()
            .await
            .on_health_transition(GatewayStatus::Down);

        let report = orchestrator
            .reveal(ALICE, 2, &CancellationToken::new(), |_| {})
            .await
            .expect("reveal");
        assert_eq!(report.mode, ExecutionMode::Plaintext);
        assert_eq!(report.prize, 60);
        assert_eq!(report.request_id, None);

        let err = orchestrator
            .reveal_on(ExecutionMode::Encrypted, ALICE, 1, &CancellationToken::new(), |_| {})
            .await
            .expect_err("disabled");
        assert!(matches!(err, LifecycleError::Mode(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_reveal_of_same_box_is_rejected() {
        let (orchestrator, _) = orchestrator(5).await;
        let orchestrator = Arc::new(orchestrator);

        let first = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move {
                orchestrator
                    .reveal(ALICE, 1, &CancellationToken::new(), |_| {})
                    .await
            }
        });
        while !orchestrator.is_in_flight(ExecutionMode::Encrypted, 1) {
            tokio::task::yield_now().await;
        }

        let err = orchestrator
            .reveal(ALICE, 1, &CancellationToken::new(), |_| {})
            .await
            .expect_err("in flight");
        assert_eq!(err, LifecycleError::InFlight(1));

        // A different box is not blocked.
        assert!(!orchestrator.is_in_flight(ExecutionMode::Encrypted, 2));

        let report = first.await.expect("join").expect("first reveal");
        assert_eq!(report.poll_attempts, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_timeout_surfaces_context() {
        let (orchestrator, encrypted) = orchestrator(u32::MAX).await;
        let err = orchestrator
            .reveal(ALICE, 1, &CancellationToken::new(), |_| {})
            .await
            .expect_err("timeout");
        assert!(matches!(
            err,
            LifecycleError::GatewayTimeout { box_id: 1, attempts: 60, .. }
        ));

        // The request stays live and can be retried.
        let info = encrypted.get_box_info(1).await.expect("info");
        assert_eq!(info.status, BoxStatus::PendingDecrypt);
        assert_eq!(
            orchestrator
                .recovery(ExecutionMode::Encrypted)
                .next_step(1, 0)
                .await
                .expect("step"),
            crate::RecoveryStep::Retry
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_reveal_releases_slot() {
        let (orchestrator, _) = orchestrator(u32::MAX).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            trigger.cancel();
        });
        let err = orchestrator
            .reveal(ALICE, 1, &cancel, |_| {})
            .await
            .expect_err("cancelled");
        assert_eq!(err, LifecycleError::Cancelled(1));
        assert!(!orchestrator.is_in_flight(ExecutionMode::Encrypted, 1));
    }
}
