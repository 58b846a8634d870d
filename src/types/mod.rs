use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;

pub mod error;
pub mod token;

/// A (bucket, key) pair queued for deletion.
///
/// Created by the key lister and moved through the task channel, so exactly
/// one worker owns it at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeleteTask {
    pub bucket: String,
    pub key: String,
}

impl DeleteTask {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for DeleteTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// One JSON document of a streamed key listing.
///
/// The store emits `{"props":{...}}` first (unless suppressed) followed by any
/// number of `{"keys":[...]}` chunks.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct KeyBatchEnvelope {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub props: Option<serde_json::Value>,
}

/// Result of a single delete, sent from a worker to the terminator.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    Deleted(DeleteTask),
    /// The key no longer existed (404). Reported, not a failure.
    AlreadyAbsent(DeleteTask),
    Failed(DeleteFailure),
}

/// A delete that failed, with the error rendered for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteFailure {
    pub task: DeleteTask,
    pub message: String,
}

/// A bucket whose key enumeration failed.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketFailure {
    pub bucket: String,
    pub message: String,
}

/// Final summary of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteReport {
    pub deleted: u64,
    pub already_absent: u64,
    pub failures: Vec<DeleteFailure>,
    pub bucket_failures: Vec<BucketFailure>,
}

impl DeleteReport {
    /// True when any delete or any enumeration failed.
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty() || !self.bucket_failures.is_empty()
    }

    pub fn attempted(&self) -> u64 {
        self.deleted + self.already_absent + self.failures.len() as u64
    }
}

/// Live counters updated by the delete workers.
///
/// Read with [`DeletionStatsReport::snapshot`] while the pipeline is running.
#[derive(Debug, Default)]
pub struct DeletionStatsReport {
    listed: AtomicU64,
    deleted: AtomicU64,
    already_absent: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`DeletionStatsReport`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletionStats {
    pub listed: u64,
    pub deleted: u64,
    pub already_absent: u64,
    pub failed: u64,
}

impl DeletionStatsReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_listed(&self) {
        self.listed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_deleted(&self) {
        self.deleted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_already_absent(&self) {
        self.already_absent.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> DeletionStats {
        DeletionStats {
            listed: self.listed.load(Ordering::SeqCst),
            deleted: self.deleted.load(Ordering::SeqCst),
            already_absent: self.already_absent.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}
