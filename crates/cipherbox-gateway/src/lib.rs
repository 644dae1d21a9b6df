//! # cipherbox-gateway
//!
//! Client side of the decryption gateway: the HTTP client, the fixed-interval
//! decryption poller, the health monitor and the execution mode selector.
//!
//! ## Modules
//!
//! - [`client`] — Gateway transport trait and the reqwest implementation
//! - [`poller`] — Polls the public-decrypt endpoint until a result is ready
//! - [`health`] — Periodic public-key probe published on a watch channel
//! - [`mode`] — Chooses between the encrypted and plaintext reveal paths

pub mod client;
pub mod health;
pub mod mode;
pub mod poller;

pub use client::{DecryptRequest, GatewayClient, GatewayReply, HttpGateway};
pub use health::{GatewayHealthMonitor, HealthOptions, TickOutcome};
pub use mode::{ModeSelector, ModeSnapshot};
pub use poller::{GatewayPoller, PollOptions, PollOutcome, PollProgress};

/// Default public gateway.
pub const DEFAULT_GATEWAY_URL: &str = "https://gateway.sepolia.zama.ai";

/// Chain the default gateway serves (Sepolia).
pub const DEFAULT_CHAIN_ID: u64 = 11_155_111;

/// Error types for gateway transport.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Connection, TLS or protocol failure.
    #[error("gateway network error: {0}")]
    Network(String),

    /// The request did not complete within its budget.
    #[error("gateway request timed out after {timeout_ms} ms")]
    Timeout {
        /// The per-request budget that elapsed.
        timeout_ms: u64,
    },

    /// The HTTP client could not be constructed.
    #[error("gateway client setup failed: {0}")]
    Setup(String),
}

/// Convenience result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Network(err.to_string())
    }
}

/// Errors from the mode selector.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModeError {
    /// The encrypted path was requested while the gateway is down.
    #[error("encrypted mode is disabled while the gateway is down")]
    EncryptedDisabled,
}
