//! Waits for the ledger callback to settle a box.
//!
//! Read failures are transient and only logged. The waiter never retries
//! the decryption itself: a [`LifecycleError::CallbackTimeout`] hands the
//! decision back to the caller.

use std::sync::Arc;
use std::time::Duration;

use cipherbox_ledger::Ledger;
use cipherbox_types::boxes::Transition;
use cipherbox_types::{BoxId, BoxInfo, BoxStatus, ExecutionMode};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{LifecycleError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitOptions {
    pub max_wait: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(120),
            poll_interval: Duration::from_millis(2_000),
        }
    }
}

/// Whether a box in `status` can never reach `target`. A terminal status
/// still has the withdraw edge out of `OPENED`.
fn out_of_reach(status: BoxStatus, target: BoxStatus, mode: ExecutionMode) -> bool {
    status.is_terminal() && status.apply(Transition::Withdraw, mode) != Some(target)
}

pub struct CallbackWaiter {
    ledger: Arc<dyn Ledger>,
    options: WaitOptions,
}

impl CallbackWaiter {
    pub fn new(ledger: Arc<dyn Ledger>, options: WaitOptions) -> Self {
        Self { ledger, options }
    }

    /// Re-read `box_id` until it reaches `target`.
    ///
    /// Returns early with [`LifecycleError::UnexpectedTerminal`] if the box
    /// settles in a terminal status from which `target` is unreachable.
    pub async fn wait_for_terminal(
        &self,
        box_id: BoxId,
        target: BoxStatus,
        cancel: &CancellationToken,
    ) -> Result<BoxInfo> {
        let start = Instant::now();
        let mode = self.ledger.mode();
        let mut last_status = None;

        loop {
            match self.ledger.get_box_info(box_id).await {
                Ok(info) if info.status == target => {
                    tracing::info!(box_id, status = %target, "callback landed");
                    return Ok(info);
                }
                Ok(info) if out_of_reach(info.status, target, mode) => {
                    return Err(LifecycleError::UnexpectedTerminal {
                        box_id,
                        expected: target,
                        actual: info.status,
                    });
                }
                Ok(info) => {
                    tracing::debug!(box_id, status = %info.status, "waiting for callback");
                    last_status = Some(info.status);
                }
                Err(e) => {
                    tracing::warn!(box_id, error = %e, "box read failed while waiting for callback");
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= self.options.max_wait {
                tracing::warn!(box_id, elapsed_secs = elapsed.as_secs(), "callback wait exhausted");
                return Err(LifecycleError::CallbackTimeout {
                    box_id,
                    last_status,
                    elapsed_secs: elapsed.as_secs(),
                });
            }

            let pause = self.options.poll_interval.min(self.options.max_wait - elapsed);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LifecycleError::Cancelled(box_id)),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}
