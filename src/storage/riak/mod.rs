use anyhow::Result;
use async_channel::Sender;
use async_trait::async_trait;
use leaky_bucket::RateLimiter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::RiakClient;
use crate::config::{Config, ForceRetryConfig};
use crate::slot::WorkerSlot;
use crate::storage::StorageTrait;
use crate::types::DeleteTask;
use crate::types::error::{RiakError, is_retryable_error};
use crate::types::token::PipelineCancellationToken;

/// [`StorageTrait`] backed by the Riak HTTP client.
///
/// Key listings use a connection of their own for the whole stream. Deletes
/// go over the connection held by the worker slot, which is dialed on first
/// use and dropped after a transport error.
#[derive(Clone)]
pub struct RiakStorage {
    client: RiakClient,
    force_retry_config: ForceRetryConfig,
    cancellation_token: PipelineCancellationToken,
    rate_limit_objects_per_sec: Option<Arc<RateLimiter>>,
}

impl RiakStorage {
    pub fn new(
        config: &Config,
        cancellation_token: PipelineCancellationToken,
        rate_limit_objects_per_sec: Option<Arc<RateLimiter>>,
    ) -> Result<Self> {
        Ok(Self {
            client: RiakClient::new(&config.client_config)?,
            force_retry_config: config.force_retry_config,
            cancellation_token,
            rate_limit_objects_per_sec,
        })
    }

    pub fn client(&self) -> &RiakClient {
        &self.client
    }

    async fn exec_rate_limit_objects_per_sec(&self) {
        if let Some(ref rate_limiter) = self.rate_limit_objects_per_sec {
            rate_limiter.acquire_one().await;
        }
    }

    async fn delete_once(&self, slot: &mut WorkerSlot, task: &DeleteTask) -> Result<()> {
        if slot.live_connection().is_none() {
            debug!(slot = slot.index(), "dialing connection for worker slot.");
            slot.set_connection(self.client.connect().await?);
        }

        let result = self
            .client
            .delete_item(&task.bucket, &task.key, &[], slot.live_connection())
            .await;

        if let Err(e) = &result {
            if matches!(e.downcast_ref::<RiakError>(), Some(RiakError::Transport(_))) {
                slot.clear_connection();
            }
        }
        result
    }
}

#[async_trait]
impl StorageTrait for RiakStorage {
    async fn list_keys(&self, bucket: &str, sender: Sender<String>) -> Result<u64> {
        self.client.stream_keys(bucket, sender, None).await
    }

    async fn delete_key(&self, slot: &mut WorkerSlot, task: &DeleteTask) -> Result<()> {
        let force_retry_count = self.force_retry_config.force_retry_count;
        let force_retry_interval =
            Duration::from_millis(self.force_retry_config.force_retry_interval_milliseconds);

        let mut attempt = 0;
        loop {
            self.exec_rate_limit_objects_per_sec().await;

            let result = self.delete_once(slot, task).await;
            match result {
                Err(e)
                    if is_retryable_error(&e)
                        && attempt < force_retry_count
                        && !self.cancellation_token.is_cancelled() =>
                {
                    attempt += 1;
                    warn!(
                        bucket = task.bucket,
                        key = task.key,
                        attempt = attempt,
                        max_attempts = force_retry_count + 1,
                        error = e.to_string(),
                        "delete failed, retrying."
                    );
                    tokio::time::sleep(force_retry_interval).await;
                }
                other => return other,
            }
        }
    }
}
