//! Built-in oracle for local development networks.
//!
//! There is no public gateway on a local chain, so the daemon answers
//! decryption polls itself: it reads the sealed prize behind the live
//! request and fulfills it on the encrypted ledger. With auto-fulfill off
//! the oracle only reports requests that were fulfilled by hand through
//! `oracle_fulfill`.

use std::sync::Arc;

use async_trait::async_trait;
use cipherbox_gateway::{DecryptRequest, GatewayClient, GatewayReply};
use cipherbox_ledger::{Ledger, LedgerError, OracleCallback};
use cipherbox_types::{RequestId, TxReceipt, Wei};
use tracing::{debug, info};

use crate::LocalLedger;

pub struct LocalOracle {
    ledger: Arc<LocalLedger>,
    auto_fulfill: bool,
    public_key: String,
}

fn decrypted(prize: Wei) -> GatewayReply {
    GatewayReply::new(
        200,
        serde_json::json!({ "decryptedValue": prize.to_string() }).to_string(),
    )
}

impl LocalOracle {
    pub fn new(ledger: Arc<LocalLedger>, auto_fulfill: bool) -> Self {
        let key = blake3::hash(&ledger.contract_address().0);
        Self {
            ledger,
            auto_fulfill,
            public_key: format!("0x04{}", hex::encode(key.as_bytes())),
        }
    }

    /// Fulfill `request_id`, with `cleartext` or else the sealed prize.
    pub async fn fulfill(
        &self,
        request_id: RequestId,
        cleartext: Option<Wei>,
    ) -> Result<(Wei, TxReceipt), LedgerError> {
        let prize = match cleartext {
            Some(prize) => prize,
            None => self.ledger.sealed_prize_for(request_id).await?,
        };
        self.ledger.acknowledge(request_id).await?;
        let receipt = self.ledger.fulfill(request_id, prize).await?;
        info!(request_id = %request_id, prize = %prize, "local oracle fulfilled request");
        Ok((prize, receipt))
    }

    async fn answer(&self, request_id: RequestId) -> Result<GatewayReply, LedgerError> {
        let request = match self.ledger.get_decryption_request(request_id).await {
            Ok(request) => request,
            Err(LedgerError::RequestNotFound(_)) => return Ok(GatewayReply::new(404, "")),
            Err(e) => return Err(e),
        };

        if request.processed {
            let info = self.ledger.get_box_info(request.box_id).await?;
            return Ok(match info.revealed_prize_amount {
                Some(prize) => decrypted(prize),
                // Rejected by the oracle; the box waits for a retry.
                None => GatewayReply::new(404, ""),
            });
        }
        if request.superseded || !self.auto_fulfill {
            debug!(request_id = %request_id, "local oracle has no result yet");
            return Ok(GatewayReply::new(404, ""));
        }

        let (prize, _) = self.fulfill(request_id, None).await?;
        Ok(decrypted(prize))
    }
}

#[async_trait]
impl GatewayClient for LocalOracle {
    async fn public_decrypt(
        &self,
        request: &DecryptRequest,
    ) -> cipherbox_gateway::Result<GatewayReply> {
        let Ok(request_id) = request.handle.parse::<RequestId>() else {
            return Ok(GatewayReply::new(400, "malformed handle"));
        };
        match self.answer(request_id).await {
            Ok(reply) => Ok(reply),
            Err(e) => Ok(GatewayReply::new(500, e.to_string())),
        }
    }

    async fn public_key(&self) -> cipherbox_gateway::Result<GatewayReply> {
        Ok(GatewayReply::new(200, self.public_key.clone()))
    }
}
