//! Gateway health monitor.
//!
//! A probe fetches the gateway's public key and checks that the body looks
//! like an uncompressed key (fixed prefix, minimum length). HTTP 200 alone is
//! not enough. Results are published on a [`watch`] channel: `checking`
//! while a probe is in flight, then the confirmed `up`/`down`.
//!
//! Ticks never overlap. A tick that starts while another probe is running
//! returns [`TickOutcome::Skipped`] without touching the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cipherbox_types::{GatewayHealth, GatewayStatus};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::client::GatewayClient;

/// Expected prefix of the key body.
pub const KEY_PREFIX: &str = "0x04";

/// Minimum key body length in characters.
pub const MIN_KEY_LENGTH: usize = 66;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthOptions {
    pub interval: Duration,
    pub timeout: Duration,
    pub key_prefix: String,
    pub min_key_length: usize,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(5),
            key_prefix: KEY_PREFIX.to_string(),
            min_key_length: MIN_KEY_LENGTH,
        }
    }
}

impl HealthOptions {
    /// Whether a 2xx body is a plausible public key. The body is checked
    /// as received, without trimming.
    pub fn is_valid_key(&self, body: &str) -> bool {
        body.starts_with(&self.key_prefix) && body.len() >= self.min_key_length
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Checked(GatewayStatus),
    /// Another probe was still running.
    Skipped,
}

/// Releases the in-flight flag on drop.
struct ProbeGuard<'a>(&'a AtomicBool);

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct GatewayHealthMonitor {
    client: Arc<dyn GatewayClient>,
    options: HealthOptions,
    in_flight: AtomicBool,
    health: watch::Sender<GatewayHealth>,
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl GatewayHealthMonitor {
    pub fn new(client: Arc<dyn GatewayClient>, options: HealthOptions) -> Self {
        let (health, _) = watch::channel(GatewayHealth::default());
        Self {
            client,
            options,
            in_flight: AtomicBool::new(false),
            health,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<GatewayHealth> {
        self.health.subscribe()
    }

    pub fn current(&self) -> GatewayHealth {
        *self.health.borrow()
    }

    /// Probe the gateway once. Does not publish anything.
    pub async fn check_health(&self) -> bool {
        match tokio::time::timeout(self.options.timeout, self.client.public_key()).await {
            Ok(Ok(reply)) if reply.is_success() => {
                let valid = self.options.is_valid_key(&reply.body);
                if !valid {
                    tracing::warn!(
                        body_len = reply.body.len(),
                        "gateway returned a malformed public key"
                    );
                }
                valid
            }
            Ok(Ok(reply)) => {
                tracing::debug!(status = reply.status, "gateway health probe rejected");
                false
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "gateway health probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(
                    timeout_ms = self.options.timeout.as_millis() as u64,
                    "gateway health probe timed out"
                );
                false
            }
        }
    }

    /// Run one probe unless one is already in flight, and publish the result.
    pub async fn tick(&self) -> TickOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("health probe still running; tick skipped");
            return TickOutcome::Skipped;
        }
        let _guard = ProbeGuard(&self.in_flight);

        let previous = self.current();
        self.health.send_modify(|h| h.status = GatewayStatus::Checking);

        let status = if self.check_health().await {
            GatewayStatus::Up
        } else {
            GatewayStatus::Down
        };
        self.health.send_replace(GatewayHealth {
            status,
            last_checked_at: Some(unix_now()),
        });

        if previous.status != status {
            tracing::info!(from = %previous.status, to = %status, "gateway status changed");
        }
        TickOutcome::Checked(status)
    }

    /// Probe immediately, then every `interval` until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        tracing::debug!("gateway health monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::client::{DecryptRequest, GatewayReply};
    use crate::{GatewayError, Result};

    fn valid_key() -> String {
        format!("0x04{}", "ab".repeat(64))
    }

    struct KeyGateway {
        reply: std::sync::Mutex<Result<GatewayReply>>,
        probes: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl KeyGateway {
        fn new(reply: Result<GatewayReply>) -> Arc<Self> {
            Arc::new(Self {
                reply: std::sync::Mutex::new(reply),
                probes: AtomicUsize::new(0),
                gate: None,
            })
        }

        fn set(&self, reply: Result<GatewayReply>) {
            *self.reply.lock().expect("lock") = reply;
        }
    }

    #[async_trait]
    impl GatewayClient for KeyGateway {
        async fn public_decrypt(&self, _request: &DecryptRequest) -> Result<GatewayReply> {
            Ok(GatewayReply::new(404, ""))
        }

        async fn public_key(&self) -> Result<GatewayReply> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            match &*self.reply.lock().expect("lock") {
                Ok(reply) => Ok(reply.clone()),
                Err(e) => Err(GatewayError::Network(e.to_string())),
            }
        }
    }

    #[test]
    fn test_key_format() {
        let options = HealthOptions::default();
        assert!(options.is_valid_key(&valid_key()));
        assert!(!options.is_valid_key(&format!(" {}", valid_key())));
        assert!(!options.is_valid_key(&format!("\n{}", valid_key())));
        assert!(!options.is_valid_key("0x04abc"));
        assert!(!options.is_valid_key(&format!("0x03{}", "ab".repeat(64))));
        assert!(!options.is_valid_key(""));
    }

    #[tokio::test]
    async fn test_malformed_key_with_200_is_down() {
        let gateway = KeyGateway::new(Ok(GatewayReply::new(200, "0x03abc")));
        let monitor = GatewayHealthMonitor::new(gateway, HealthOptions::default());
        assert!(!monitor.check_health().await);
        assert_eq!(monitor.tick().await, TickOutcome::Checked(GatewayStatus::Down));
        assert_eq!(monitor.current().status, GatewayStatus::Down);
    }

    #[tokio::test]
    async fn test_tick_publishes_transitions() {
        let gateway = KeyGateway::new(Ok(GatewayReply::new(200, valid_key())));
        let monitor = GatewayHealthMonitor::new(gateway.clone(), HealthOptions::default());
        let mut rx = monitor.subscribe();
        assert_eq!(rx.borrow_and_update().status, GatewayStatus::Checking);

        assert_eq!(monitor.tick().await, TickOutcome::Checked(GatewayStatus::Up));
        let health = *rx.borrow_and_update();
        assert_eq!(health.status, GatewayStatus::Up);
        assert!(health.last_checked_at.is_some());

        gateway.set(Err(GatewayError::Network("refused".to_string())));
        assert_eq!(monitor.tick().await, TickOutcome::Checked(GatewayStatus::Down));
        assert_eq!(rx.borrow_and_update().status, GatewayStatus::Down);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_is_down() {
        let gate = Arc::new(Notify::new());
        let gateway = Arc::new(KeyGateway {
            reply: std::sync::Mutex::new(Ok(GatewayReply::new(200, valid_key()))),
            probes: AtomicUsize::new(0),
            gate: Some(gate),
        });
        let monitor = GatewayHealthMonitor::new(gateway, HealthOptions::default());
        assert!(!monitor.check_health().await);
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let gate = Arc::new(Notify::new());
        let gateway = Arc::new(KeyGateway {
            reply: std::sync::Mutex::new(Ok(GatewayReply::new(200, valid_key()))),
            probes: AtomicUsize::new(0),
            gate: Some(gate.clone()),
        });
        let monitor = Arc::new(GatewayHealthMonitor::new(
            gateway.clone(),
            HealthOptions::default(),
        ));

        let first = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.tick().await }
        });
        while gateway.probes.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(monitor.current().status, GatewayStatus::Checking);
        assert_eq!(monitor.tick().await, TickOutcome::Skipped);

        gate.notify_one();
        assert_eq!(
            first.await.expect("join"),
            TickOutcome::Checked(GatewayStatus::Up)
        );
        assert_eq!(gateway.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_probes_on_interval_until_cancelled() {
        let gateway = KeyGateway::new(Ok(GatewayReply::new(200, valid_key())));
        let monitor = Arc::new(GatewayHealthMonitor::new(
            gateway.clone(),
            HealthOptions::default(),
        ));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(monitor.clone().run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(125)).await;
        cancel.cancel();
        task.await.expect("join");

        // Immediate probe plus one at 60 s and one at 120 s.
        assert_eq!(gateway.probes.load(Ordering::SeqCst), 3);
        assert_eq!(monitor.current().status, GatewayStatus::Up);
    }
}
