//! Delete stage of the riakrm pipeline.
//!
//! A single [`KeyDeleter`] drains the task channel. For each task it first
//! takes a slot from the [`WorkerSlotPool`], then runs the delete on a task of
//! its own, so the pool size is the only bound on deletes in flight. The
//! outcome of every delete, including a panicking one, is reported on the
//! outcome channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use async_channel::Sender;
use tracing::{debug, error, info};

use crate::slot::{SlotGuard, WorkerSlotPool};
use crate::stage::Stage;
use crate::types::error::{is_cancelled_error, is_unknown_key_error};
use crate::types::{DeleteFailure, DeleteOutcome, DeleteTask};


/// Pipeline stage that issues deletes with at most `worker_size` in flight.
pub struct KeyDeleter {
    base: Stage,
    slots: WorkerSlotPool,
    outcomes: Sender<DeleteOutcome>,
    has_panic: Arc<AtomicBool>,
}

impl KeyDeleter {
    pub fn new(
        base: Stage,
        slots: WorkerSlotPool,
        outcomes: Sender<DeleteOutcome>,
        has_panic: Arc<AtomicBool>,
    ) -> Self {
        Self {
            base,
            slots,
            outcomes,
            has_panic,
        }
    }

    /// Main entry point: read tasks until the channel closes or the pipeline
    /// is cancelled, then wait for every delete already issued.
    pub async fn delete(&self) -> Result<()> {
        debug!(
            worker_size = self.slots.capacity(),
            "key deleter has started."
        );

        let result = self.receive_and_delete().await;
        self.wait_for_in_flight().await;

        match result {
            Err(e) if is_cancelled_error(&e) => {
                info!("key deleter has been cancelled.");
                Ok(())
            }
            Err(e) => Err(e),
            Ok(()) => {
                debug!("key deleter has been completed.");
                Ok(())
            }
        }
    }

    async fn receive_and_delete(&self) -> Result<()> {
        let receiver = self
            .base
            .receiver
            .as_ref()
            .ok_or_else(|| anyhow!("key deleter has no receiver."))?;

        loop {
            let task = tokio::select! {
                task = receiver.recv() => match task {
                    Ok(task) => task,
                    Err(_) => return Ok(()),
                },
                _ = self.base.cancellation_token.cancelled() => {
                    // Listers blocked on a full channel see it closed and stop.
                    receiver.close();
                    return Ok(());
                }
            };

            let slot = tokio::select! {
                slot = self.slots.acquire() => slot?,
                _ = self.base.cancellation_token.cancelled() => {
                    receiver.close();
                    return Ok(());
                }
            };

            self.spawn_delete(task, slot);
        }
    }

    fn spawn_delete(&self, task: DeleteTask, mut slot: SlotGuard) {
        if self.base.config.verbose {
            info!(
                bucket = task.bucket,
                key = task.key,
                slot = slot.index(),
                "deleting key."
            );
        }

        let target = dyn_clone::clone_box(&*self.base.target);
        let mut report = OutcomeReporter {
            task: Some(task),
            outcomes: self.outcomes.clone(),
            has_panic: self.has_panic.clone(),
        };

        tokio::spawn(async move {
            let Some(task) = report.task.as_ref() else {
                return;
            };
            let result = target.delete_key(&mut slot, task).await;
            report.finish(result);
            drop(slot);
        });
    }

    /// Every issued delete holds a slot until it finishes, so holding all of
    /// them means none is left in flight.
    async fn wait_for_in_flight(&self) {
        let mut held = Vec::with_capacity(self.slots.capacity());
        for _ in 0..self.slots.capacity() {
            match self.slots.acquire().await {
                Ok(slot) => held.push(slot),
                Err(e) => {
                    error!(error = e.to_string(), "waiting for in-flight deletes failed.");
                    return;
                }
            }
        }
        debug!(slots = held.len(), "all deletes have finished.");
    }
}

/// Turns the result of one delete into a [`DeleteOutcome`].
///
/// A key the store no longer has is reported as already absent, not as a
/// failure.
pub fn classify_outcome(task: DeleteTask, result: Result<()>) -> DeleteOutcome {
    match result {
        Ok(()) => DeleteOutcome::Deleted(task),
        Err(e) if is_unknown_key_error(&e) => DeleteOutcome::AlreadyAbsent(task),
        Err(e) => DeleteOutcome::Failed(DeleteFailure {
            task,
            message: format!("{e:#}"),
        }),
    }
}

/// Sends exactly one outcome per delete. If the delete task unwinds before
/// [`OutcomeReporter::finish`], the drop reports it as failed.
struct OutcomeReporter {
    task: Option<DeleteTask>,
    outcomes: Sender<DeleteOutcome>,
    has_panic: Arc<AtomicBool>,
}

impl OutcomeReporter {
    fn finish(&mut self, result: Result<()>) {
        if let Some(task) = self.task.take() {
            self.send(classify_outcome(task, result));
        }
    }

    fn send(&self, outcome: DeleteOutcome) {
        // Unbounded, so this only fails once the terminator is gone.
        if self.outcomes.try_send(outcome).is_err() {
            debug!("outcome channel closed.");
        }
    }
}

impl Drop for OutcomeReporter {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.has_panic.store(true, Ordering::SeqCst);
            error!(
                bucket = task.bucket,
                key = task.key,
                "delete task panicked."
            );
            self.send(DeleteOutcome::Failed(DeleteFailure {
                task,
                message: "delete task panicked".to_string(),
            }));
        }
    }
}
