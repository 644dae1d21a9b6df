//! Configuration file management.
//!
//! `config.toml` lives in the data directory. Every field has a default, so
//! a missing file or a partial one is always valid.

use std::path::PathBuf;
use std::time::Duration;

use cipherbox_gateway::{HealthOptions, PollOptions, DEFAULT_CHAIN_ID, DEFAULT_GATEWAY_URL};
use cipherbox_ledger::SubmissionEventStyle;
use cipherbox_lifecycle::WaitOptions;
use cipherbox_types::{Address, ExecutionMode};
use serde::{Deserialize, Serialize};

/// Chain id of a local development network. The daemon runs its own
/// oracle there.
pub const LOCAL_CHAIN_ID: u64 = 31_337;

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Decryption gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Result polling settings.
    #[serde(default)]
    pub polling: PollingConfig,
    /// Callback wait settings.
    #[serde(default)]
    pub callback: CallbackConfig,
    /// Execution mode selection.
    #[serde(default)]
    pub mode: ModeConfig,
    /// Ledger deployment settings.
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Advanced settings.
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL; `/v1/public-decrypt` and `/public_key` are appended.
    #[serde(default = "default_gateway_url")]
    pub url: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Seconds between health probes.
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
    /// Per-probe timeout in seconds.
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,
    /// A healthy public key starts with this prefix.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// ... and has at least this many characters.
    #[serde(default = "default_min_key_length")]
    pub min_key_length: usize,
    /// Per-request timeout for decryption polls, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Local networks only: the built-in oracle answers polls by fulfilling
    /// the request. When off, requests wait for `oracle_fulfill`.
    #[serde(default = "default_true")]
    pub local_auto_fulfill: bool,
}

/// Polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

/// Callback wait configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackConfig {
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
    #[serde(default = "default_callback_poll_ms")]
    pub poll_interval_ms: u64,
}

/// Mode configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeConfig {
    /// Follow gateway health.
    #[serde(default = "default_true")]
    pub auto: bool,
    /// Mode used when `auto` is off.
    #[serde(default = "default_pinned_mode")]
    pub pinned: ExecutionMode,
}

/// Ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
    #[serde(default = "default_encrypted_address")]
    pub encrypted_contract: Address,
    #[serde(default = "default_plaintext_address")]
    pub plaintext_contract: Address,
    /// Contract owner, and the sender for transactions that name no one.
    #[serde(default = "default_operator")]
    pub operator: Address,
    /// "BoxOpenRequested" | "DecryptionRequested" | "none".
    #[serde(default = "default_submission_event")]
    pub submission_event: String,
    /// Seconds between expiry sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Advanced configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions

fn default_gateway_url() -> String {
    DEFAULT_GATEWAY_URL.to_string()
}

fn default_chain_id() -> u64 {
    DEFAULT_CHAIN_ID
}

fn default_health_interval() -> u64 {
    60
}

fn default_health_timeout() -> u64 {
    5
}

fn default_key_prefix() -> String {
    cipherbox_gateway::health::KEY_PREFIX.to_string()
}

fn default_min_key_length() -> usize {
    cipherbox_gateway::health::MIN_KEY_LENGTH
}

fn default_request_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    60
}

fn default_interval_ms() -> u64 {
    5_000
}

fn default_max_wait() -> u64 {
    120
}

fn default_callback_poll_ms() -> u64 {
    2_000
}

fn default_pinned_mode() -> ExecutionMode {
    ExecutionMode::Plaintext
}

fn default_encrypted_address() -> Address {
    Address([0xe1; 20])
}

fn default_plaintext_address() -> Address {
    Address([0x51; 20])
}

fn default_operator() -> Address {
    Address([0x0a; 20])
}

fn default_submission_event() -> String {
    "BoxOpenRequested".to_string()
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            chain_id: default_chain_id(),
            health_interval_secs: default_health_interval(),
            health_timeout_secs: default_health_timeout(),
            key_prefix: default_key_prefix(),
            min_key_length: default_min_key_length(),
            request_timeout_secs: default_request_timeout(),
            local_auto_fulfill: true,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
        }
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: default_max_wait(),
            poll_interval_ms: default_callback_poll_ms(),
        }
    }
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            auto: true,
            pinned: default_pinned_mode(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            encrypted_contract: default_encrypted_address(),
            plaintext_contract: default_plaintext_address(),
            operator: default_operator(),
            submission_event: default_submission_event(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl GatewayConfig {
    pub fn is_local(&self) -> bool {
        self.chain_id == LOCAL_CHAIN_ID
    }

    pub fn health_options(&self) -> HealthOptions {
        HealthOptions {
            interval: Duration::from_secs(self.health_interval_secs.max(1)),
            timeout: Duration::from_secs(self.health_timeout_secs.max(1)),
            key_prefix: self.key_prefix.clone(),
            min_key_length: self.min_key_length,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: DaemonConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.ledger.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.ledger.data_dir)
        }
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            max_attempts: self.polling.max_attempts.max(1),
            interval: Duration::from_millis(self.polling.interval_ms),
            request_timeout: Duration::from_secs(self.gateway.request_timeout_secs.max(1)),
        }
    }

    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            max_wait: Duration::from_secs(self.callback.max_wait_secs),
            poll_interval: Duration::from_millis(self.callback.poll_interval_ms.max(1)),
        }
    }

    /// Unknown names fall back to the current event.
    pub fn submission_event(&self) -> SubmissionEventStyle {
        match self.ledger.submission_event.as_str() {
            "DecryptionRequested" => SubmissionEventStyle::DecryptionRequested,
            "none" => SubmissionEventStyle::Omitted,
            _ => SubmissionEventStyle::BoxOpenRequested,
        }
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("CIPHERBOX_DATA_DIR") {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/CipherBox")
        }
        #[cfg(not(target_os = "macos"))]
        {
            dirs_fallback(".cipherbox")
        }
    }
}

/// Fallback home directory resolution.
fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/cipherbox"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.gateway.chain_id, DEFAULT_CHAIN_ID);
        assert!(!config.gateway.is_local());
        assert_eq!(config.polling.max_attempts, 60);
        assert_eq!(config.poll_options().interval, Duration::from_secs(5));
        assert_eq!(config.wait_options().max_wait, Duration::from_secs(120));
        assert!(config.mode.auto);
        assert_eq!(config.submission_event(), SubmissionEventStyle::BoxOpenRequested);
    }

    #[test]
    fn test_config_serialization() {
        let config = DaemonConfig::default();
        let toml_str = toml::to_string(&config).expect("serialize");
        let parsed: DaemonConfig = toml::from_str(&toml_str).expect("parse");
        assert_eq!(parsed.ledger.operator, config.ledger.operator);
    }

    #[test]
    fn test_partial_config() {
        let parsed: DaemonConfig = toml::from_str(
            r#"
            [gateway]
            chain_id = 31337

            [mode]
            auto = false
            pinned = "encrypted"

            [ledger]
            submission_event = "DecryptionRequested"
            "#,
        )
        .expect("parse");
        assert!(parsed.gateway.is_local());
        assert_eq!(parsed.gateway.url, DEFAULT_GATEWAY_URL);
        assert_eq!(parsed.mode.pinned, ExecutionMode::Encrypted);
        assert_eq!(parsed.submission_event(), SubmissionEventStyle::DecryptionRequested);
        assert_eq!(parsed.polling.interval_ms, 5_000);
    }
}
