use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_channel::{Receiver, Sender};

use crate::config::Config;
use crate::storage::Storage;
use crate::types::token::PipelineCancellationToken;
use crate::types::{DeleteTask, DeletionStatsReport};

/// Result of sending a task to the next stage.
#[derive(Debug, Clone, PartialEq)]
pub enum SendResult {
    Success,
    Closed,
}

/// Shared context passed to each pipeline stage.
///
/// The key listers have no `receiver` (they are the entry point) and write
/// [`DeleteTask`]s to `sender`. The key deleter has no `sender`; it reads
/// `receiver` and reports outcomes on a channel of its own.
pub struct Stage {
    pub config: Config,
    pub target: Storage,
    pub receiver: Option<Receiver<DeleteTask>>,
    pub sender: Option<Sender<DeleteTask>>,
    pub cancellation_token: PipelineCancellationToken,
    pub stats: Arc<DeletionStatsReport>,
}

impl Stage {
    pub fn new(
        config: Config,
        target: Storage,
        receiver: Option<Receiver<DeleteTask>>,
        sender: Option<Sender<DeleteTask>>,
        cancellation_token: PipelineCancellationToken,
        stats: Arc<DeletionStatsReport>,
    ) -> Self {
        Self {
            config,
            target,
            receiver,
            sender,
            cancellation_token,
            stats,
        }
    }

    /// Send a task to the next stage.
    ///
    /// Returns `SendResult::Closed` if the downstream channel has been closed
    /// (e.g. due to cancellation), allowing the caller to exit gracefully.
    pub async fn send(&self, task: DeleteTask) -> Result<SendResult> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("stage has no sender."))?;

        let result = sender
            .send(task)
            .await
            .context("async_channel::Sender::send() failed.");

        if let Err(e) = result {
            return if !sender.is_closed() {
                Err(e)
            } else {
                Ok(SendResult::Closed)
            };
        }

        Ok(SendResult::Success)
    }

    /// Check if the sender channel has been closed by the receiver.
    pub fn is_channel_closed(&self) -> bool {
        self.sender.as_ref().is_none_or(Sender::is_closed)
    }
}
