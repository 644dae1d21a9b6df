//! # cipherbox-lifecycle
//!
//! Drives a box from purchase to a revealed prize. The pieces compose into
//! one pipeline:
//!
//! ```text
//! ModeSelector -> RequestSubmitter -> GatewayPoller -> CallbackWaiter
//!                                                   \-> RetryCoordinator on timeout
//! ```
//!
//! ## Modules
//!
//! - [`error`] — Lifecycle error taxonomy
//! - [`submitter`] — Submits (or resumes) the open request
//! - [`waiter`] — Waits for the ledger callback to land
//! - [`retry`] — Retry, expiry and emergency resolution
//! - [`orchestrator`] — The full reveal pipeline with per-box exclusion

pub mod error;
pub mod orchestrator;
pub mod retry;
pub mod submitter;
pub mod waiter;

pub use error::{LifecycleError, Result};
pub use orchestrator::{LedgerSet, RevealOrchestrator, RevealReport};
pub use retry::{RecoveryStep, RetryCoordinator};
pub use submitter::{extract_request_id, RequestSubmitter, Submission};
pub use waiter::{CallbackWaiter, WaitOptions};
