use anyhow::Result;
use async_channel::Receiver;
use tracing::{debug, error};

use crate::stage::{SendResult, Stage};
use crate::types::DeleteTask;
use crate::types::error::{RiakError, is_cancelled_error};

/// Streams the keys of one bucket into the deletion pipeline.
///
/// Keys arrive from [`StorageTrait::list_keys`](crate::storage::StorageTrait::list_keys)
/// over a per-bucket channel and are forwarded, in the order the store sent
/// them, as [`DeleteTask`]s on the shared task channel.
///
/// ## Pipeline role
///
/// ```text
/// KeyLister (one per bucket) → KeyDeleter → Terminator
/// ```
pub struct KeyLister {
    stage: Stage,
    bucket: String,
}

impl KeyLister {
    pub fn new(stage: Stage, bucket: impl Into<String>) -> Self {
        Self {
            stage,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// List the bucket and forward every key. Returns the number of keys
    /// handed to the deleter.
    ///
    /// Cancellation ends the listing early without an error.
    pub async fn list_target(&self) -> Result<u64> {
        debug!(bucket = self.bucket, "key listing has started.");

        let (key_sender, key_receiver) =
            async_channel::bounded::<String>(self.stage.config.key_queue_size.max(1) as usize);

        let listing = async {
            tokio::select! {
                result = self.stage.target.list_keys(&self.bucket, key_sender) => result,
                _ = self.stage.cancellation_token.cancelled() => Err(RiakError::Cancelled.into()),
            }
        };
        let (listed, forwarded) = tokio::join!(listing, self.forward_keys(key_receiver));

        let forwarded = forwarded?;
        match listed {
            Ok(listed) => {
                debug!(
                    bucket = self.bucket,
                    listed = listed,
                    forwarded = forwarded,
                    "key listing has been completed."
                );
            }
            Err(e) if is_cancelled_error(&e) => {
                debug!(bucket = self.bucket, "key listing has been cancelled.");
            }
            Err(e) => {
                error!(
                    bucket = self.bucket,
                    error = format!("{e:#}"),
                    "key listing failed."
                );
                return Err(e);
            }
        }

        Ok(forwarded)
    }

    async fn forward_keys(&self, keys: Receiver<String>) -> Result<u64> {
        let result = self.forward_until_done(&keys).await;
        // Unblocks the listing if we stopped before it did.
        keys.close();
        result
    }

    async fn forward_until_done(&self, keys: &Receiver<String>) -> Result<u64> {
        let mut forwarded = 0;
        loop {
            tokio::select! {
                key = keys.recv() => {
                    let Ok(key) = key else {
                        return Ok(forwarded);
                    };
                    self.stage.stats.increment_listed();
                    if self.stage.send(DeleteTask::new(&self.bucket, key)).await? == SendResult::Closed {
                        debug!(bucket = self.bucket, "task channel closed, key listing stops.");
                        return Ok(forwarded);
                    }
                    forwarded += 1;
                },
                _ = self.stage.cancellation_token.cancelled() => {
                    return Ok(forwarded);
                }
            }
        }
    }
}
