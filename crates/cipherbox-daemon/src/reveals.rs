//! Background reveal pipelines.
//!
//! `open_box` returns as soon as a pipeline is spawned; progress and the
//! outcome reach clients as events. Each pipeline owns a child of the
//! daemon's shutdown token so it can be stopped on its own (cancel, retry,
//! expiry) or together with everything else.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cipherbox_gateway::PollProgress;
use cipherbox_ledger::Clock;
use cipherbox_lifecycle::LifecycleError;
use cipherbox_types::{Address, BoxId, ExecutionMode};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::events::{BOX_OPENED, DECRYPTION_PROGRESS, REVEAL_FAILED, REVEAL_SUBMITTED};
use crate::rpc::RpcError;
use crate::DaemonState;

type TaskKey = (ExecutionMode, BoxId);

struct RevealTask {
    generation: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Running pipelines, at most one per box.
#[derive(Default)]
pub struct RevealTasks {
    tasks: Mutex<HashMap<TaskKey, RevealTask>>,
    generation: AtomicU64,
}

impl RevealTasks {
    fn lock(&self) -> MutexGuard<'_, HashMap<TaskKey, RevealTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self, mode: ExecutionMode, box_id: BoxId) -> bool {
        self.lock().contains_key(&(mode, box_id))
    }

    pub fn running(&self) -> usize {
        self.lock().len()
    }

    /// Stop the pipeline for a box and wait until it has exited.
    ///
    /// Returns whether one was running.
    pub async fn cancel(&self, mode: ExecutionMode, box_id: BoxId) -> bool {
        let task = self.lock().remove(&(mode, box_id));
        let Some(task) = task else {
            return false;
        };
        task.token.cancel();
        if let Err(e) = task.handle.await {
            warn!(box_id, error = %e, "reveal task ended abnormally");
        }
        true
    }

    fn finish(&self, key: TaskKey, generation: u64) {
        let mut tasks = self.lock();
        if tasks.get(&key).is_some_and(|t| t.generation == generation) {
            tasks.remove(&key);
        }
    }
}

/// Start a background reveal of `box_id` on `mode`.
pub fn spawn_reveal(
    state: &Arc<DaemonState>,
    mode: ExecutionMode,
    caller: Address,
    box_id: BoxId,
) -> Result<(), RpcError> {
    let key = (mode, box_id);
    let mut tasks = state.reveals.lock();
    if tasks.contains_key(&key) || state.orchestrator.is_in_flight(mode, box_id) {
        return Err(LifecycleError::InFlight(box_id).into());
    }

    let generation = state.reveals.generation.fetch_add(1, Ordering::Relaxed);
    let token = state.shutdown.child_token();
    let handle = tokio::spawn(run_reveal(
        state.clone(),
        mode,
        caller,
        box_id,
        token.clone(),
        generation,
    ));
    tasks.insert(
        key,
        RevealTask {
            generation,
            token,
            handle,
        },
    );
    Ok(())
}

async fn run_reveal(
    state: Arc<DaemonState>,
    mode: ExecutionMode,
    caller: Address,
    box_id: BoxId,
    token: CancellationToken,
    generation: u64,
) {
    state.event_bus.publish(
        REVEAL_SUBMITTED,
        serde_json::json!({"box_id": box_id, "mode": mode, "caller": caller}),
    );

    let bus = state.event_bus.clone();
    let on_progress = move |progress: PollProgress| {
        bus.publish(
            DECRYPTION_PROGRESS,
            serde_json::json!({
                "box_id": box_id,
                "current": progress.current,
                "total": progress.total,
                "percentage": progress.percentage,
            }),
        );
    };

    match state
        .orchestrator
        .reveal_on(mode, caller, box_id, &token, on_progress)
        .await
    {
        Ok(report) => {
            let payload = serde_json::to_value(&report).unwrap_or_default();
            state.event_bus.publish(BOX_OPENED, payload);
        }
        Err(err) => {
            if matches!(err, LifecycleError::Cancelled(_)) {
                info!(box_id, %mode, "reveal cancelled");
            } else {
                warn!(box_id, %mode, error = %err, "reveal failed");
            }
            let recovery = state
                .orchestrator
                .recovery(mode)
                .next_step(box_id, state.clock.now())
                .await
                .ok();
            let rpc = RpcError::from(err.clone());
            state.event_bus.publish(
                REVEAL_FAILED,
                serde_json::json!({
                    "box_id": box_id,
                    "mode": mode,
                    "code": rpc.code,
                    "error": rpc.message,
                    "detail": err.to_string(),
                    "retryable": err.is_retryable(),
                    "recovery": recovery,
                }),
            );
        }
    }

    state.reveals.finish((mode, box_id), generation);
}
