//! Deletion pipeline orchestrator.
//!
//! Creates and connects the pipeline stages:
//!
//! ```text
//! KeyLister (one per bucket) → task channel → KeyDeleter → outcome channel → Terminator
//!                                                  │
//!                                           WorkerSlotPool (N)
//! ```
//!
//! The task channel is bounded by `key_queue_size`, so enumeration never runs
//! far ahead of the deletes. Deletes start as soon as the first key arrives.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_channel::{Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::deleter::KeyDeleter;
use crate::lister::KeyLister;
use crate::slot::WorkerSlotPool;
use crate::stage::Stage;
use crate::storage::{self, Storage};
use crate::terminator::Terminator;
use crate::types::error::RiakError;
use crate::types::token::PipelineCancellationToken;
use crate::types::{
    BucketFailure, DeleteOutcome, DeleteReport, DeleteTask, DeletionStats, DeletionStatsReport,
};

/// The bulk delete pipeline.
///
/// ## Usage
///
/// ```no_run
/// # async fn example() -> anyhow::Result<()> {
/// use riakrm_rs::{Config, DeletionPipeline, create_pipeline_cancellation_token};
///
/// let mut config = Config::for_buckets(["sessions"]);
/// config.worker_size = 8;
///
/// let mut pipeline = DeletionPipeline::new(config, create_pipeline_cancellation_token())?;
/// let report = pipeline.run().await?;
/// if pipeline.has_error() {
///     eprintln!("{:?}", pipeline.get_errors_and_consume().unwrap()[0]);
/// }
/// println!("{} deleted, {} failed", report.deleted, report.failures.len());
/// # Ok(())
/// # }
/// ```
pub struct DeletionPipeline {
    config: Config,
    target: Storage,
    cancellation_token: PipelineCancellationToken,
    slots: WorkerSlotPool,
    has_error: Arc<AtomicBool>,
    has_panic: Arc<AtomicBool>,
    errors: Arc<Mutex<VecDeque<anyhow::Error>>>,
    bucket_failures: Arc<Mutex<Vec<BucketFailure>>>,
    ready: bool,
    deletion_stats_report: Arc<DeletionStatsReport>,
}

impl DeletionPipeline {
    /// Create a pipeline talking to the store at `config.client_config.root_url`.
    ///
    /// Fails with [`RiakError::InvalidConfig`] when no bucket is given, the
    /// worker size is zero, or the root URL cannot be used.
    pub fn new(config: Config, cancellation_token: PipelineCancellationToken) -> Result<Self> {
        let target = storage::create_storage(&config, cancellation_token.clone())?;
        Self::with_storage(config, target, cancellation_token)
    }

    /// Create a pipeline over any [`StorageTrait`](crate::storage::StorageTrait)
    /// implementation.
    pub fn with_storage(
        config: Config,
        target: Storage,
        cancellation_token: PipelineCancellationToken,
    ) -> Result<Self> {
        if config.buckets.is_empty() {
            return Err(RiakError::InvalidConfig("no bucket to delete".to_string()).into());
        }
        if config.worker_size == 0 {
            return Err(
                RiakError::InvalidConfig("worker size must be at least 1".to_string()).into(),
            );
        }
        let slots = WorkerSlotPool::new(config.worker_size as usize)?;

        Ok(Self {
            config,
            target,
            cancellation_token,
            slots,
            has_error: Arc::new(AtomicBool::new(false)),
            has_panic: Arc::new(AtomicBool::new(false)),
            errors: Arc::new(Mutex::new(VecDeque::new())),
            bucket_failures: Arc::new(Mutex::new(Vec::new())),
            ready: true,
            deletion_stats_report: Arc::new(DeletionStatsReport::new()),
        })
    }

    /// Run the pipeline to completion.
    ///
    /// Returns once every bucket has been enumerated and every accepted
    /// delete has finished. Individual failures are collected in the report,
    /// they never stop the run. Can only be called once.
    pub async fn run(&mut self) -> Result<DeleteReport> {
        if !self.ready {
            return Err(anyhow!("DeletionPipeline::run() called more than once."));
        }
        self.ready = false;

        let report = self.execute_pipeline().await;
        debug!(
            deleted = report.deleted,
            already_absent = report.already_absent,
            failed = report.failures.len(),
            bucket_failures = report.bucket_failures.len(),
            "deletion pipeline has been completed."
        );
        Ok(report)
    }

    /// Check if any pipeline-level error occurred.
    ///
    /// Per-key and per-bucket failures are not pipeline errors; they are in
    /// the [`DeleteReport`].
    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::SeqCst)
    }

    /// Check if any spawned task panicked during the pipeline execution.
    pub fn has_panic(&self) -> bool {
        self.has_panic.load(Ordering::SeqCst)
    }

    /// Consume and return all accumulated errors.
    ///
    /// Returns `None` if no errors occurred.
    pub fn get_errors_and_consume(&self) -> Option<Vec<anyhow::Error>> {
        if !self.has_error() {
            return None;
        }
        let mut error_list = self.errors.lock().unwrap();
        Some(error_list.drain(..).collect())
    }

    /// Get error messages without consuming them.
    pub fn get_error_messages(&self) -> Option<Vec<String>> {
        if !self.has_error() {
            return None;
        }
        let error_list = self.errors.lock().unwrap();
        Some(error_list.iter().map(|e| format!("{e:#}")).collect())
    }

    /// Get a snapshot of the current deletion statistics.
    pub fn get_deletion_stats(&self) -> DeletionStats {
        self.deletion_stats_report.snapshot()
    }

    /// The slot pool bounding deletes in flight.
    pub fn worker_slots(&self) -> &WorkerSlotPool {
        &self.slots
    }

    pub fn cancellation_token(&self) -> &PipelineCancellationToken {
        &self.cancellation_token
    }

    // -----------------------------------------------------------------------
    // Internal methods
    // -----------------------------------------------------------------------

    async fn execute_pipeline(&self) -> DeleteReport {
        let (task_sender, task_receiver) =
            async_channel::bounded::<DeleteTask>(self.config.key_queue_size.max(1) as usize);
        let (outcome_sender, outcome_receiver) = async_channel::unbounded::<DeleteOutcome>();

        // Stage 1: one lister per bucket, all feeding the same channel
        let listers: Vec<JoinHandle<()>> = self
            .config
            .buckets
            .iter()
            .map(|bucket| self.spawn_lister(bucket, task_sender.clone()))
            .collect();
        // The channel closes when the last lister finishes
        drop(task_sender);

        // Stage 2: the deleter
        let deleter = self.spawn_deleter(task_receiver, outcome_sender);

        // Stage 3: the terminator
        let terminator = Terminator::new(
            outcome_receiver,
            self.deletion_stats_report.clone(),
            self.config.verbose,
        );
        let mut report = match tokio::spawn(async move { terminator.terminate().await }).await {
            Ok(report) => report,
            Err(e) => {
                self.has_panic.store(true, Ordering::SeqCst);
                error!("terminator task panicked: {}", e);
                self.record_error(anyhow!("terminator task panicked: {}", e));
                DeleteReport::default()
            }
        };

        for lister in listers {
            let _ = lister.await;
        }
        let _ = deleter.await;

        report.bucket_failures = self.bucket_failures.lock().unwrap().drain(..).collect();
        report
    }

    fn record_error(&self, error: anyhow::Error) {
        self.has_error.store(true, Ordering::SeqCst);
        self.errors.lock().unwrap().push_back(error);
    }

    fn create_stage(
        &self,
        receiver: Option<Receiver<DeleteTask>>,
        sender: Option<Sender<DeleteTask>>,
    ) -> Stage {
        Stage::new(
            self.config.clone(),
            dyn_clone::clone_box(&*self.target),
            receiver,
            sender,
            self.cancellation_token.clone(),
            self.deletion_stats_report.clone(),
        )
    }

    /// Spawn the lister of one bucket.
    ///
    /// A failed enumeration is recorded as a [`BucketFailure`]; the other
    /// buckets carry on.
    fn spawn_lister(&self, bucket: &str, sender: Sender<DeleteTask>) -> JoinHandle<()> {
        let lister = KeyLister::new(self.create_stage(None, Some(sender)), bucket);
        let bucket = bucket.to_string();

        let has_error = self.has_error.clone();
        let has_panic = self.has_panic.clone();
        let error_list = self.errors.clone();
        let bucket_failures = self.bucket_failures.clone();

        tokio::spawn(async move {
            let join_result = tokio::spawn(async move { lister.list_target().await }).await;

            match join_result {
                Ok(Ok(forwarded)) => {
                    debug!(bucket, forwarded, "key lister completed successfully.");
                }
                Ok(Err(e)) => {
                    warn!(bucket, "enumeration failed, continuing with other buckets.");
                    bucket_failures.lock().unwrap().push(BucketFailure {
                        bucket,
                        message: format!("{e:#}"),
                    });
                }
                Err(e) => {
                    has_error.store(true, Ordering::SeqCst);
                    has_panic.store(true, Ordering::SeqCst);
                    error!(bucket, "key lister task panicked: {}", e);
                    bucket_failures.lock().unwrap().push(BucketFailure {
                        bucket,
                        message: format!("key lister panicked: {e}"),
                    });
                    error_list
                        .lock()
                        .unwrap()
                        .push_back(anyhow!("key lister task panicked: {}", e));
                }
            }
        })
    }

    /// Spawn the deleter. Uses the double-spawn pattern to catch panics.
    fn spawn_deleter(
        &self,
        receiver: Receiver<DeleteTask>,
        outcomes: Sender<DeleteOutcome>,
    ) -> JoinHandle<()> {
        let deleter = KeyDeleter::new(
            self.create_stage(Some(receiver), None),
            self.slots.clone(),
            outcomes,
            self.has_panic.clone(),
        );

        let has_error = self.has_error.clone();
        let has_panic = self.has_panic.clone();
        let error_list = self.errors.clone();
        let cancellation_token = self.cancellation_token.clone();

        tokio::spawn(async move {
            let join_result = tokio::spawn(async move { deleter.delete().await }).await;

            match join_result {
                Ok(Ok(())) => {
                    debug!("key deleter completed successfully.");
                }
                Ok(Err(e)) => {
                    cancellation_token.cancel();
                    has_error.store(true, Ordering::SeqCst);
                    error!("key deleter failed: {}", e);
                    error_list.lock().unwrap().push_back(e);
                }
                Err(e) => {
                    cancellation_token.cancel();
                    has_error.store(true, Ordering::SeqCst);
                    has_panic.store(true, Ordering::SeqCst);
                    error!("key deleter task panicked: {}", e);
                    error_list
                        .lock()
                        .unwrap()
                        .push_back(anyhow!("key deleter task panicked: {}", e));
                }
            }
        })
    }
}

/// Delete every key of `config.buckets` and return the report.
///
/// A pipeline-level error (not a per-key failure) is returned as `Err`.
pub async fn delete_all(config: Config) -> Result<DeleteReport> {
    let mut pipeline =
        DeletionPipeline::new(config, crate::types::token::create_pipeline_cancellation_token())?;
    let report = pipeline.run().await?;
    if let Some(e) = pipeline
        .get_errors_and_consume()
        .and_then(|errors| errors.into_iter().next())
    {
        return Err(e);
    }
    Ok(report)
}
