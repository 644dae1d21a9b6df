//! # cipherbox-types
//!
//! Shared domain types used across the CipherBox workspace: boxes, decryption
//! requests, series, ledger events and gateway health.

pub mod boxes;
pub mod events;
pub mod gateway;
pub mod ids;

pub use boxes::{BoxInfo, BoxSeries, BoxStatus, DecryptionRequest, LedgerConstants};
pub use events::{EventLog, LedgerEvent, TxReceipt};
pub use gateway::{ExecutionMode, GatewayHealth, GatewayStatus};
pub use ids::{Address, RequestId, TxHash};

/// Common type aliases.
pub type BoxId = u64;
pub type SeriesId = u64;

/// Amounts are denominated in wei.
pub type Wei = u128;

/// One ether in wei.
pub const WEI_PER_ETH: Wei = 1_000_000_000_000_000_000;

/// Gas forwarded to the oracle callback transaction.
pub const DEFAULT_CALLBACK_GAS_LIMIT: u64 = 500_000;

/// Seconds an outstanding decryption request stays valid.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 3600;

/// Maximum number of retries per box.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Errors produced while parsing identifiers and enum names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypesError {
    /// Identifier was not valid hex or had the wrong length.
    #[error("invalid {kind}: {value}")]
    InvalidIdentifier {
        /// Which identifier kind failed to parse.
        kind: &'static str,
        /// The offending input.
        value: String,
    },

    /// Unknown enum name.
    #[error("unknown {kind}: {value}")]
    UnknownVariant {
        /// Which enum failed to parse.
        kind: &'static str,
        /// The offending input.
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constants() {
        let constants = LedgerConstants::default();
        assert_eq!(constants.callback_gas_limit, DEFAULT_CALLBACK_GAS_LIMIT);
        assert_eq!(constants.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        assert_eq!(constants.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_wei_per_eth() {
        assert_eq!(WEI_PER_ETH, 10u128.pow(18));
    }
}
