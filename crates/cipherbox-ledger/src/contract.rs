//! Reference contract.
//!
//! [`ReferenceLedger`] runs the box contract rules against any
//! [`LedgerStore`]. Each transaction is validated and applied inside one
//! [`LedgerStore::atomically`] call, then recorded as a [`TxReceipt`] whose
//! logs carry the emitted events.

use std::sync::Arc;

use async_trait::async_trait;
use cipherbox_types::{
    Address, BoxId, BoxInfo, BoxSeries, BoxStatus, DecryptionRequest, EventLog, ExecutionMode,
    LedgerConstants, LedgerEvent, RequestId, SeriesId, TxHash, TxReceipt, Wei,
};
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::state_machine::BoxRecord;
use crate::store::LedgerStore;
use crate::{Ledger, LedgerError, OracleCallback, Result};

/// Which event a successful encrypted open emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SubmissionEventStyle {
    /// Current contract versions.
    #[default]
    BoxOpenRequested,
    /// Older contract versions.
    DecryptionRequested,
    /// No submission event at all.
    Omitted,
}

impl SubmissionEventStyle {
    fn event(self, box_id: BoxId, owner: Address, request_id: RequestId) -> Option<LedgerEvent> {
        match self {
            SubmissionEventStyle::BoxOpenRequested => Some(LedgerEvent::BoxOpenRequested {
                box_id,
                owner,
                request_id,
            }),
            SubmissionEventStyle::DecryptionRequested => Some(LedgerEvent::DecryptionRequested {
                box_id,
                request_id,
            }),
            SubmissionEventStyle::Omitted => None,
        }
    }
}

/// Deployment parameters of one contract.
#[derive(Clone, Debug)]
pub struct ContractConfig {
    pub address: Address,
    /// Contract owner: creates series and may emergency-resolve.
    pub owner: Address,
    pub mode: ExecutionMode,
    pub constants: LedgerConstants,
    pub submission_event: SubmissionEventStyle,
}

impl ContractConfig {
    pub fn new(address: Address, owner: Address, mode: ExecutionMode) -> Self {
        Self {
            address,
            owner,
            mode,
            constants: LedgerConstants::default(),
            submission_event: SubmissionEventStyle::default(),
        }
    }
}

/// Store-agnostic implementation of the box contract.
pub struct ReferenceLedger<S> {
    config: ContractConfig,
    store: Mutex<S>,
    clock: Arc<dyn Clock>,
}

fn load_box<S: LedgerStore>(store: &S, box_id: BoxId) -> Result<BoxRecord> {
    store
        .load_box(box_id)?
        .ok_or(LedgerError::BoxNotFound(box_id))
}

fn load_request<S: LedgerStore>(store: &S, request_id: RequestId) -> Result<DecryptionRequest> {
    store
        .load_request(request_id)?
        .ok_or(LedgerError::RequestNotFound(request_id))
}

/// Load a request the oracle may still answer.
fn load_live_request<S: LedgerStore>(
    store: &S,
    request_id: RequestId,
) -> Result<DecryptionRequest> {
    let request = load_request(store, request_id)?;
    if !request.is_live() {
        return Err(LedgerError::StaleRequest(request_id));
    }
    Ok(request)
}

/// Mark the box's live request superseded, if it has one.
fn supersede_current<S: LedgerStore>(store: &mut S, record: &BoxRecord) -> Result<()> {
    if let Some(id) = record.info.current_request {
        if let Some(mut request) = store.load_request(id)? {
            if request.is_live() {
                request.superseded = true;
                store.update_request(&request)?;
            }
        }
    }
    Ok(())
}

impl<S: LedgerStore> ReferenceLedger<S> {
    pub fn new(config: ContractConfig, store: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store: Mutex::new(store),
            clock,
        }
    }

    pub fn config(&self) -> &ContractConfig {
        &self.config
    }

    /// Record a receipt for the events emitted by one transaction.
    ///
    /// The hash commits to the contract address and the transaction
    /// sequence number.
    fn transact(&self, store: &mut S, now: u64, events: &[LedgerEvent]) -> Result<TxReceipt> {
        let seq = store.tx_count()?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.config.address.0);
        hasher.update(&seq.to_be_bytes());
        let receipt = TxReceipt {
            tx_hash: TxHash(*hasher.finalize().as_bytes()),
            block_time: now,
            logs: events.iter().map(EventLog::from_event).collect(),
        };
        store.record_receipt(&receipt)?;
        Ok(receipt)
    }

    fn require_owner(&self, from: Address, action: &'static str) -> Result<()> {
        if from != self.config.owner {
            return Err(LedgerError::Unauthorized {
                caller: from,
                action,
            });
        }
        Ok(())
    }

    /// Create a series of `total_boxes` boxes at `price`. Owner only.
    pub async fn create_series(
        &self,
        from: Address,
        name: &str,
        price: Wei,
        total_boxes: u32,
    ) -> Result<(SeriesId, TxReceipt)> {
        self.require_owner(from, "create series")?;
        if name.trim().is_empty() {
            return Err(LedgerError::InvalidSeries("name must not be empty".to_string()));
        }
        if price == 0 {
            return Err(LedgerError::InvalidSeries("price must be positive".to_string()));
        }
        if total_boxes == 0 {
            return Err(LedgerError::InvalidSeries(
                "series must contain at least one box".to_string(),
            ));
        }

        let now = self.clock.now();
        let mut store = self.store.lock().await;
        store.atomically(|store| {
            let series_id = store.series_count()? + 1;
            store.insert_series(&BoxSeries {
                id: series_id,
                name: name.to_string(),
                price,
                total_boxes,
                remaining_boxes: total_boxes,
                creator: from,
                is_active: true,
            })?;
            let receipt = self.transact(
                store,
                now,
                &[LedgerEvent::SeriesCreated {
                    series_id,
                    name: name.to_string(),
                    price,
                    total_boxes,
                }],
            )?;
            tracing::info!(series_id, price = %price, total_boxes, "series created");
            Ok((series_id, receipt))
        })
    }

    /// Buy the next box of a series.
    ///
    /// `sealed_prize` is stored opaquely and only surfaces once the box is
    /// opened.
    pub async fn purchase_box(
        &self,
        from: Address,
        series_id: SeriesId,
        payment: Wei,
        sealed_prize: Wei,
    ) -> Result<(BoxId, TxReceipt)> {
        let now = self.clock.now();
        let mut store = self.store.lock().await;
        store.atomically(|store| {
            let mut series = store
                .load_series(series_id)?
                .ok_or(LedgerError::SeriesNotFound(series_id))?;
            if !series.is_available() {
                return Err(LedgerError::SeriesUnavailable(series_id));
            }
            if payment != series.price {
                return Err(LedgerError::IncorrectPayment {
                    expected: series.price,
                    actual: payment,
                });
            }

            let box_id = store.box_count()? + 1;
            store.insert_box(&BoxRecord {
                info: BoxInfo {
                    box_id,
                    series_id,
                    owner: from,
                    status: BoxStatus::Purchased,
                    revealed_prize_amount: None,
                    purchase_time: now,
                    expires_at: None,
                    current_request: None,
                },
                sealed_prize,
                price_paid: payment,
            })?;
            series.remaining_boxes -= 1;
            store.update_series(&series)?;
            let balance = store.balance()?;
            store.set_balance(balance.saturating_add(payment))?;

            let receipt = self.transact(
                store,
                now,
                &[LedgerEvent::BoxPurchased {
                    box_id,
                    series_id,
                    buyer: from,
                }],
            )?;
            tracing::info!(box_id, series_id, buyer = %from.short(), "box purchased");
            Ok((box_id, receipt))
        })
    }

    /// Add funds that back prize payouts.
    pub async fn deposit_prize_fund(&self, from: Address, amount: Wei) -> Result<TxReceipt> {
        let now = self.clock.now();
        let mut store = self.store.lock().await;
        store.atomically(|store| {
            let balance = store.balance()?;
            store.set_balance(balance.saturating_add(amount))?;
            self.transact(store, now, &[LedgerEvent::PrizeFundDeposited { from, amount }])
        })
    }

    pub async fn contract_balance(&self) -> Result<Wei> {
        self.store.lock().await.balance()
    }

    pub async fn get_series_info(&self, series_id: SeriesId) -> Result<BoxSeries> {
        self.store
            .lock()
            .await
            .load_series(series_id)?
            .ok_or(LedgerError::SeriesNotFound(series_id))
    }

    pub async fn total_series(&self) -> Result<u64> {
        self.store.lock().await.series_count()
    }

    /// Boxes with an outstanding decryption request.
    pub async fn boxes_awaiting_decryption(&self) -> Result<Vec<BoxInfo>> {
        let store = self.store.lock().await;
        store
            .boxes_awaiting_decryption()?
            .into_iter()
            .map(|box_id| load_box(&*store, box_id).map(|r| r.info))
            .collect()
    }

    /// The sealed prize behind a live request, for oracle-side decryption.
    pub async fn sealed_prize_for(&self, request_id: RequestId) -> Result<Wei> {
        let store = self.store.lock().await;
        let request = load_live_request(&*store, request_id)?;
        Ok(load_box(&*store, request.box_id)?.sealed_prize)
    }
}

#[async_trait]
impl<S: LedgerStore> Ledger for ReferenceLedger<S> {
    fn mode(&self) -> ExecutionMode {
        self.config.mode
    }

    fn contract_address(&self) -> Address {
        self.config.address
    }

    async fn constants(&self) -> Result<LedgerConstants> {
        Ok(self.config.constants)
    }

    async fn owner(&self) -> Result<Address> {
        Ok(self.config.owner)
    }

    async fn get_box_info(&self, box_id: BoxId) -> Result<BoxInfo> {
        let store = self.store.lock().await;
        Ok(load_box(&*store, box_id)?.info)
    }

    async fn get_decryption_request(&self, request_id: RequestId) -> Result<DecryptionRequest> {
        let store = self.store.lock().await;
        load_request(&*store, request_id)
    }

    async fn get_user_box_ids(&self, owner: Address) -> Result<Vec<BoxId>> {
        self.store.lock().await.box_ids_of(owner)
    }

    async fn open_box(&self, from: Address, box_id: BoxId) -> Result<TxReceipt> {
        let now = self.clock.now();
        let mut store = self.store.lock().await;
        store.atomically(|store| {
            let mut record = load_box(store, box_id)?;
            if record.info.owner != from {
                return Err(LedgerError::Unauthorized {
                    caller: from,
                    action: "open box",
                });
            }

            match self.config.mode {
                ExecutionMode::Plaintext => {
                    let prize_amount = record.open_plaintext()?;
                    store.update_box(&record)?;
                    tracing::info!(box_id, prize = %prize_amount, "box opened");
                    self.transact(
                        store,
                        now,
                        &[LedgerEvent::BoxOpened {
                            box_id,
                            owner: from,
                            prize_amount,
                        }],
                    )
                }
                ExecutionMode::Encrypted => {
                    let request_id = RequestId::from_u64(store.request_count()? + 1);
                    record.open_encrypted(request_id, now, &self.config.constants)?;
                    store.update_box(&record)?;
                    store.insert_request(&DecryptionRequest {
                        request_id,
                        box_id,
                        requester: from,
                        submitted_at: now,
                        retry_count: 0,
                        processed: false,
                        superseded: false,
                    })?;
                    tracing::info!(box_id, request_id = %request_id, "decryption requested");
                    let events: Vec<_> = self
                        .config
                        .submission_event
                        .event(box_id, from, request_id)
                        .into_iter()
                        .collect();
                    self.transact(store, now, &events)
                }
            }
        })
    }

    async fn retry_decryption(&self, from: Address, box_id: BoxId) -> Result<TxReceipt> {
        let now = self.clock.now();
        let mut store = self.store.lock().await;
        store.atomically(|store| {
            let mut record = load_box(store, box_id)?;
            if from != record.info.owner && from != self.config.owner {
                return Err(LedgerError::Unauthorized {
                    caller: from,
                    action: "retry decryption",
                });
            }

            let previous = match record.info.current_request {
                Some(id) => Some(load_request(store, id)?),
                None => None,
            };
            let retry_count = previous.as_ref().map_or(0, |r| r.retry_count);
            let request_id = RequestId::from_u64(store.request_count()? + 1);
            record.retry(retry_count, request_id, now, &self.config.constants)?;

            // `retry` only succeeds for boxes with a live request.
            let Some(mut previous) = previous else {
                return Err(LedgerError::InvalidStatus {
                    box_id,
                    status: record.info.status,
                    action: "retry",
                });
            };
            previous.superseded = true;
            store.update_request(&previous)?;
            store.update_box(&record)?;
            store.insert_request(&DecryptionRequest {
                request_id,
                box_id,
                requester: from,
                submitted_at: now,
                retry_count: retry_count + 1,
                processed: false,
                superseded: false,
            })?;

            tracing::info!(
                box_id,
                previous = %previous.request_id,
                request_id = %request_id,
                retry_count = retry_count + 1,
                "decryption retried"
            );
            self.transact(
                store,
                now,
                &[LedgerEvent::DecryptionRetrying {
                    box_id,
                    previous_request_id: previous.request_id,
                    request_id,
                    retry_count: retry_count + 1,
                }],
            )
        })
    }

    async fn cancel_expired_box(&self, _from: Address, box_id: BoxId) -> Result<TxReceipt> {
        let now = self.clock.now();
        let mut store = self.store.lock().await;
        store.atomically(|store| {
            let mut record = load_box(store, box_id)?;
            record.cancel_expired(now)?;
            supersede_current(store, &record)?;

            let balance = store.balance()?;
            let refund = record.price_paid.min(balance);
            store.set_balance(balance - refund)?;
            store.update_box(&record)?;

            tracing::info!(box_id, refund = %refund, "box expired");
            self.transact(
                store,
                now,
                &[LedgerEvent::BoxExpired {
                    box_id,
                    owner: record.info.owner,
                    refund,
                }],
            )
        })
    }

    async fn emergency_resolve(
        &self,
        from: Address,
        box_id: BoxId,
        prize_amount: Wei,
    ) -> Result<TxReceipt> {
        self.require_owner(from, "emergency resolve")?;
        let now = self.clock.now();
        let mut store = self.store.lock().await;
        store.atomically(|store| {
            let mut record = load_box(store, box_id)?;
            let previous_status = record.info.status;
            record.emergency_resolve(prize_amount)?;
            supersede_current(store, &record)?;
            store.update_box(&record)?;

            tracing::warn!(
                box_id,
                resolver = %from,
                previous_status = %previous_status,
                prize = %prize_amount,
                "box emergency-resolved without the oracle"
            );
            self.transact(
                store,
                now,
                &[LedgerEvent::EmergencyResolved {
                    box_id,
                    resolver: from,
                    prize_amount,
                }],
            )
        })
    }

    async fn withdraw_prize(&self, from: Address, box_id: BoxId) -> Result<TxReceipt> {
        let now = self.clock.now();
        let mut store = self.store.lock().await;
        store.atomically(|store| {
            let mut record = load_box(store, box_id)?;
            if record.info.owner != from {
                return Err(LedgerError::Unauthorized {
                    caller: from,
                    action: "withdraw prize",
                });
            }
            let amount = record.withdraw(self.config.mode)?;
            let balance = store.balance()?;
            if balance < amount {
                return Err(LedgerError::InsufficientFunds {
                    required: amount,
                    available: balance,
                });
            }
            store.set_balance(balance - amount)?;
            store.update_box(&record)?;

            tracing::info!(box_id, amount = %amount, "prize withdrawn");
            self.transact(
                store,
                now,
                &[LedgerEvent::PrizeWithdrawn {
                    box_id,
                    owner: from,
                    amount,
                }],
            )
        })
    }
}

#[async_trait]
impl<S: LedgerStore> OracleCallback for ReferenceLedger<S> {
    async fn acknowledge(&self, request_id: RequestId) -> Result<TxReceipt> {
        let now = self.clock.now();
        let mut store = self.store.lock().await;
        store.atomically(|store| {
            let request = load_live_request(store, request_id)?;
            let mut record = load_box(store, request.box_id)?;
            if record.info.status == BoxStatus::Decrypting {
                return self.transact(store, now, &[]);
            }
            record.acknowledge(request_id)?;
            store.update_box(&record)?;
            tracing::debug!(box_id = request.box_id, request_id = %request_id, "oracle acknowledged");
            self.transact(
                store,
                now,
                &[LedgerEvent::DecryptionAcknowledged {
                    box_id: request.box_id,
                    request_id,
                }],
            )
        })
    }

    async fn fulfill(&self, request_id: RequestId, cleartext: Wei) -> Result<TxReceipt> {
        let now = self.clock.now();
        let mut store = self.store.lock().await;
        store.atomically(|store| {
            let mut request = load_live_request(store, request_id)?;
            let mut record = load_box(store, request.box_id)?;
            record.finalize(request_id, cleartext)?;
            request.processed = true;
            store.update_request(&request)?;
            store.update_box(&record)?;

            tracing::info!(box_id = request.box_id, request_id = %request_id, prize = %cleartext, "decryption completed");
            self.transact(
                store,
                now,
                &[
                    LedgerEvent::DecryptionCompleted {
                        box_id: request.box_id,
                        request_id,
                        prize_amount: cleartext,
                    },
                    LedgerEvent::BoxOpened {
                        box_id: request.box_id,
                        owner: record.info.owner,
                        prize_amount: cleartext,
                    },
                ],
            )
        })
    }

    async fn reject(&self, request_id: RequestId, reason: &str) -> Result<TxReceipt> {
        let now = self.clock.now();
        let mut store = self.store.lock().await;
        store.atomically(|store| {
            let mut request = load_live_request(store, request_id)?;
            request.processed = true;
            store.update_request(&request)?;

            tracing::warn!(box_id = request.box_id, request_id = %request_id, reason, "decryption failed");
            self.transact(
                store,
                now,
                &[LedgerEvent::DecryptionFailed {
                    box_id: request.box_id,
                    request_id,
                    reason: reason.to_string(),
                }],
            )
        })
    }
}
