//! Gateway health and execution mode types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::TypesError;

/// Liveness classification of the decryption gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    Up,
    Down,
    /// A probe is in flight; not a confirmed state.
    Checking,
}

impl GatewayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayStatus::Up => "up",
            GatewayStatus::Down => "down",
            GatewayStatus::Checking => "checking",
        }
    }

    /// `Up` and `Down` are confirmed; `Checking` is transient.
    pub fn is_confirmed(&self) -> bool {
        !matches!(self, GatewayStatus::Checking)
    }
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ephemeral gateway health snapshot. Never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayHealth {
    pub status: GatewayStatus,
    /// Unix seconds of the last completed probe.
    pub last_checked_at: Option<u64>,
}

impl Default for GatewayHealth {
    fn default() -> Self {
        Self {
            status: GatewayStatus::Checking,
            last_checked_at: None,
        }
    }
}

/// Which ledger path reveals prizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Prize is stored in clear and known as soon as the box is opened.
    Plaintext,
    /// Prize is sealed and revealed through the decryption gateway.
    Encrypted,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Plaintext => "plaintext",
            ExecutionMode::Encrypted => "encrypted",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plaintext" | "simple" => Ok(ExecutionMode::Plaintext),
            "encrypted" | "fhe" => Ok(ExecutionMode::Encrypted),
            other => Err(TypesError::UnknownVariant {
                kind: "execution mode",
                value: other.to_string(),
            }),
        }
    }
}
