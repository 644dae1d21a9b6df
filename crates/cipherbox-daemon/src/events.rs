//! Event emission.
//!
//! Events are pushed from the daemon to subscribed RPC connections as
//! JSON-RPC notifications. Each subscriber has an independent buffer; a
//! subscriber that falls more than the capacity behind loses the oldest
//! events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cipherbox_types::BoxId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A reveal pipeline started for a box.
pub const REVEAL_SUBMITTED: &str = "RevealSubmitted";
/// One gateway poll came back not ready.
pub const DECRYPTION_PROGRESS: &str = "DecryptionProgress";
/// The prize of a box is known.
pub const BOX_OPENED: &str = "BoxOpened";
/// A reveal pipeline stopped without a prize.
pub const REVEAL_FAILED: &str = "RevealFailed";
/// A box passed its deadline and was cancelled.
pub const BOX_EXPIRED: &str = "BoxExpired";
/// The confirmed gateway status flipped.
pub const GATEWAY_STATUS_CHANGED: &str = "GatewayStatusChanged";
/// The active execution mode changed.
pub const EXECUTION_MODE_CHANGED: &str = "ExecutionModeChanged";
pub const DAEMON_STARTED: &str = "DaemonStarted";

/// An event emitted by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type name (e.g. "BoxOpened", "DaemonStarted").
    pub event_type: String,
    /// Unix timestamp.
    pub timestamp: u64,
    /// Type-specific payload.
    pub payload: serde_json::Value,
}

impl Event {
    /// Build an event stamped with the current time.
    pub fn now(event_type: &str, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            payload,
        }
    }

    /// The box this event is about, if any.
    pub fn box_id(&self) -> Option<BoxId> {
        self.payload.get("box_id").and_then(|v| v.as_u64())
    }
}

/// Filter for event subscriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Category filter: "box", "gateway", "system".
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    /// Only events about these boxes. Events without a box pass.
    #[serde(default)]
    pub box_ids: Option<Vec<BoxId>>,
}

/// Event bus for broadcasting events to subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: Event) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Shorthand for [`EventBus::emit`] with [`Event::now`].
    pub fn publish(&self, event_type: &str, payload: serde_json::Value) {
        self.emit(Event::now(event_type, payload));
    }

    /// Subscribe to events. Returns a receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Get the current sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl EventFilter {
    /// Check if an event matches this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref categories) = self.categories {
            let event_category = categorize_event(&event.event_type);
            if !categories.iter().any(|c| c == event_category) {
                return false;
            }
        }

        if let Some(ref box_ids) = self.box_ids {
            if let Some(box_id) = event.box_id() {
                if !box_ids.contains(&box_id) {
                    return false;
                }
            }
        }

        true
    }
}

/// Categorize an event type into a category.
pub fn categorize_event(event_type: &str) -> &'static str {
    match event_type {
        s if s.starts_with("Box")
            || s.starts_with("Reveal")
            || s.starts_with("Decryption") =>
        {
            "box"
        }
        s if s.starts_with("Gateway") || s.starts_with("ExecutionMode") => "gateway",
        _ => "system",
    }
}
