//! Execution mode selection.
//!
//! In auto mode a confirmed health transition flips the active path
//! (`up` selects encrypted, `down` selects plaintext). In manual mode the
//! operator's choice stands, except that the encrypted path is refused
//! while the gateway is down. It is reported as disabled, never silently
//! rerouted.
//!
//! The selector is plain state; the daemon feeds it from the health watch
//! channel.

use cipherbox_types::{ExecutionMode, GatewayStatus};
use serde::Serialize;

use crate::ModeError;

/// Path auto mode picks for a confirmed health status.
pub fn decide(auto: bool, current: ExecutionMode, health: GatewayStatus) -> ExecutionMode {
    if !auto {
        return current;
    }
    match health {
        GatewayStatus::Up => ExecutionMode::Encrypted,
        GatewayStatus::Down => ExecutionMode::Plaintext,
        GatewayStatus::Checking => current,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ModeSnapshot {
    pub auto: bool,
    pub active: ExecutionMode,
    /// Last confirmed gateway status, `checking` before the first probe.
    pub health: GatewayStatus,
    /// Whether the encrypted path may be selected right now.
    pub encrypted_available: bool,
}

#[derive(Clone, Debug)]
pub struct ModeSelector {
    auto: bool,
    active: ExecutionMode,
    health: GatewayStatus,
}

impl Default for ModeSelector {
    fn default() -> Self {
        Self {
            auto: true,
            active: ExecutionMode::Plaintext,
            health: GatewayStatus::Checking,
        }
    }
}

impl ModeSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start in manual mode pinned to `mode`.
    pub fn pinned(mode: ExecutionMode) -> Self {
        Self {
            auto: false,
            active: mode,
            health: GatewayStatus::Checking,
        }
    }

    pub fn is_auto(&self) -> bool {
        self.auto
    }

    pub fn health(&self) -> GatewayStatus {
        self.health
    }

    pub fn snapshot(&self) -> ModeSnapshot {
        ModeSnapshot {
            auto: self.auto,
            active: self.active,
            health: self.health,
            encrypted_available: self.health != GatewayStatus::Down,
        }
    }

    /// Feed a health observation. `checking` and repeats of the last
    /// confirmed status are ignored.
    ///
    /// Returns the new active path if it changed.
    pub fn on_health_transition(&mut self, status: GatewayStatus) -> Option<ExecutionMode> {
        if !status.is_confirmed() || status == self.health {
            return None;
        }
        self.health = status;

        let next = decide(self.auto, self.active, status);
        if next == self.active {
            return None;
        }
        tracing::info!(from = %self.active, to = %next, gateway = %status, "execution mode switched");
        self.active = next;
        Some(next)
    }

    /// Switch to manual mode on `mode`.
    pub fn pin(&mut self, mode: ExecutionMode) -> Result<(), ModeError> {
        self.check(mode)?;
        self.auto = false;
        self.active = mode;
        Ok(())
    }

    /// Toggle auto mode. Enabling it re-applies the last confirmed health.
    pub fn set_auto(&mut self, auto: bool) -> ExecutionMode {
        self.auto = auto;
        self.active = decide(auto, self.active, self.health);
        self.active
    }

    /// Whether `mode` may be used right now.
    pub fn check(&self, mode: ExecutionMode) -> Result<(), ModeError> {
        if mode == ExecutionMode::Encrypted && self.health == GatewayStatus::Down {
            return Err(ModeError::EncryptedDisabled);
        }
        Ok(())
    }

    /// The path a new reveal should take.
    pub fn resolve(&self) -> Result<ExecutionMode, ModeError> {
        self.check(self.active)?;
        Ok(self.active)
    }
}
