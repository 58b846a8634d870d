//! Terminator stage for the deletion pipeline.
//!
//! Consumes every [`DeleteOutcome`] until all delete tasks have dropped their
//! senders, logs failures and folds everything into a [`DeleteReport`].

use std::sync::Arc;

use async_channel::Receiver;
use tracing::{debug, error, info};

use crate::types::{DeleteOutcome, DeleteReport, DeletionStatsReport};

#[derive(Debug)]
pub struct Terminator {
    receiver: Receiver<DeleteOutcome>,
    stats: Arc<DeletionStatsReport>,
    verbose: bool,
}

impl Terminator {
    pub fn new(
        receiver: Receiver<DeleteOutcome>,
        stats: Arc<DeletionStatsReport>,
        verbose: bool,
    ) -> Self {
        Self {
            receiver,
            stats,
            verbose,
        }
    }

    /// Consume all outcomes until the channel closes.
    pub async fn terminate(&self) -> DeleteReport {
        debug!("terminator has started.");

        let mut report = DeleteReport::default();
        while let Ok(outcome) = self.receiver.recv().await {
            match outcome {
                DeleteOutcome::Deleted(_) => {
                    self.stats.increment_deleted();
                    report.deleted += 1;
                }
                DeleteOutcome::AlreadyAbsent(task) => {
                    self.stats.increment_already_absent();
                    if self.verbose {
                        info!(
                            bucket = task.bucket,
                            key = task.key,
                            "key was already absent."
                        );
                    }
                    report.already_absent += 1;
                }
                DeleteOutcome::Failed(failure) => {
                    self.stats.increment_failed();
                    error!(
                        bucket = failure.task.bucket,
                        key = failure.task.key,
                        error = failure.message,
                        "delete failed."
                    );
                    report.failures.push(failure);
                }
            }
        }

        debug!(
            deleted = report.deleted,
            already_absent = report.already_absent,
            failed = report.failures.len(),
            "terminator has been completed."
        );
        report
    }
}
