//! Decryption result polling.
//!
//! Fixed-interval loop against the public-decrypt endpoint. A 2xx answer
//! ends the loop; 404 means "not ready yet"; anything else (other status
//! codes, network errors, per-attempt timeouts) is logged and retried on the
//! next tick. The loop never sleeps after its final attempt and stops within
//! one interval of cancellation.

use std::sync::Arc;
use std::time::Duration;

use cipherbox_types::{Address, RequestId};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::client::{DecryptRequest, GatewayClient, GatewayReply};

/// Error text reported when every attempt came back empty.
pub const TIMEOUT_ERROR: &str = "gateway decryption timeout";

/// Default number of attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;

/// Default delay between attempts.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(5_000);

/// Default budget for a single attempt.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollOptions {
    pub max_attempts: u32,
    pub interval: Duration,
    pub request_timeout: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Reported before every attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PollProgress {
    pub current: u32,
    pub total: u32,
    /// `round(current / total * 100)`.
    pub percentage: u8,
}

impl PollProgress {
    pub fn new(current: u32, total: u32) -> Self {
        let percentage = if total == 0 {
            100
        } else {
            ((u64::from(current) * 200 + u64::from(total)) / (u64::from(total) * 2)).min(100) as u8
        };
        Self {
            current,
            total,
            percentage,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PollOutcome {
    /// The gateway returned the decrypted payload.
    Decrypted {
        data: serde_json::Value,
        attempts: u32,
    },
    /// Every attempt came back empty.
    TimedOut { attempts: u32 },
    /// The caller cancelled the loop.
    Cancelled { attempts: u32 },
}

impl PollOutcome {
    pub fn success(&self) -> bool {
        matches!(self, PollOutcome::Decrypted { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Decrypted { attempts, .. }
            | PollOutcome::TimedOut { attempts }
            | PollOutcome::Cancelled { attempts } => *attempts,
        }
    }

    pub fn data(&self) -> Option<&serde_json::Value> {
        match self {
            PollOutcome::Decrypted { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&'static str> {
        match self {
            PollOutcome::Decrypted { .. } => None,
            PollOutcome::TimedOut { .. } => Some(TIMEOUT_ERROR),
            PollOutcome::Cancelled { .. } => Some("cancelled"),
        }
    }
}

/// Non-JSON bodies are kept as a JSON string.
fn parse_payload(reply: &GatewayReply) -> serde_json::Value {
    serde_json::from_str(&reply.body)
        .unwrap_or_else(|_| serde_json::Value::String(reply.body.clone()))
}

pub struct GatewayPoller {
    client: Arc<dyn GatewayClient>,
    chain_id: u64,
    options: PollOptions,
}

impl GatewayPoller {
    pub fn new(client: Arc<dyn GatewayClient>, chain_id: u64, options: PollOptions) -> Self {
        Self {
            client,
            chain_id,
            options,
        }
    }

    pub fn options(&self) -> PollOptions {
        self.options
    }

    /// Poll until the gateway returns the decrypted value for `request_id`.
    pub async fn poll_decryption<F>(
        &self,
        request_id: RequestId,
        contract_address: Address,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> PollOutcome
    where
        F: FnMut(PollProgress) + Send,
    {
        let request = DecryptRequest::new(request_id, contract_address, self.chain_id);
        let total = self.options.max_attempts;

        for attempt in 1..=total {
            if cancel.is_cancelled() {
                return PollOutcome::Cancelled {
                    attempts: attempt - 1,
                };
            }
            on_progress(PollProgress::new(attempt, total));

            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return PollOutcome::Cancelled { attempts: attempt };
                }
                reply = tokio::time::timeout(
                    self.options.request_timeout,
                    self.client.public_decrypt(&request),
                ) => reply,
            };

            match reply {
                Ok(Ok(reply)) if reply.is_success() => {
                    tracing::info!(request_id = %request_id, attempt, "decryption result ready");
                    return PollOutcome::Decrypted {
                        data: parse_payload(&reply),
                        attempts: attempt,
                    };
                }
                Ok(Ok(reply)) if reply.is_not_ready() => {
                    tracing::debug!(request_id = %request_id, attempt, total, "decryption not ready");
                }
                Ok(Ok(reply)) => {
                    tracing::warn!(
                        request_id = %request_id,
                        attempt,
                        status = reply.status,
                        "unexpected gateway status"
                    );
                }
                Ok(Err(e)) => {
                    tracing::warn!(request_id = %request_id, attempt, error = %e, "gateway poll failed");
                }
                Err(_) => {
                    tracing::warn!(
                        request_id = %request_id,
                        attempt,
                        timeout_ms = self.options.request_timeout.as_millis() as u64,
                        "gateway poll timed out"
                    );
                }
            }

            if attempt < total {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return PollOutcome::Cancelled { attempts: attempt };
                    }
                    _ = tokio::time::sleep(self.options.interval) => {}
                }
            }
        }

        tracing::warn!(request_id = %request_id, attempts = total, "{TIMEOUT_ERROR}");
        PollOutcome::TimedOut { attempts: total }
    }
}
