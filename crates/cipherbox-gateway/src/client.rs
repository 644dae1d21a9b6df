//! Gateway transport.
//!
//! [`GatewayClient`] is the seam between the poller/health monitor and the
//! network. Callers bound each call with their own timeout, so
//! implementations only need to report what the gateway answered.

use std::time::Duration;

use async_trait::async_trait;
use cipherbox_types::{Address, RequestId};
use serde::Serialize;

use crate::{GatewayError, Result};

/// Body of a public-decrypt call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptRequest {
    /// `0x` followed by 64 hex digits.
    pub handle: String,
    pub contract_address: Address,
    pub chain_id: u64,
}

impl DecryptRequest {
    pub fn new(request_id: RequestId, contract_address: Address, chain_id: u64) -> Self {
        Self {
            handle: request_id.to_handle(),
            contract_address,
            chain_id,
        }
    }
}

/// Raw HTTP answer: status code plus body text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayReply {
    pub status: u16,
    pub body: String,
}

impl GatewayReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The gateway has not produced a result yet.
    pub fn is_not_ready(&self) -> bool {
        self.status == 404
    }
}

#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// `POST /v1/public-decrypt`.
    async fn public_decrypt(&self, request: &DecryptRequest) -> Result<GatewayReply>;

    /// `GET /public_key`.
    async fn public_key(&self) -> Result<GatewayReply>;
}

/// reqwest-backed client.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpGateway {
    /// `timeout` is a ceiling for every request; callers may apply a tighter
    /// one.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Setup(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_err(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            err.into()
        }
    }

    async fn read_reply(&self, response: reqwest::Response) -> Result<GatewayReply> {
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.map_err(e))?;
        Ok(GatewayReply { status, body })
    }
}

#[async_trait]
impl GatewayClient for HttpGateway {
    async fn public_decrypt(&self, request: &DecryptRequest) -> Result<GatewayReply> {
        let response = self
            .client
            .post(format!("{}/v1/public-decrypt", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;
        self.read_reply(response).await
    }

    async fn public_key(&self) -> Result<GatewayReply> {
        let response = self
            .client
            .get(format!("{}/public_key", self.base_url))
            .send()
            .await
            .map_err(|e| self.map_err(e))?;
        self.read_reply(response).await
    }
}
