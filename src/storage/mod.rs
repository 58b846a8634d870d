use anyhow::Result;
use async_channel::Sender;
use async_trait::async_trait;
use dyn_clone::DynClone;
use leaky_bucket::RateLimiter;
use std::sync::Arc;

use crate::config::Config;
use crate::slot::WorkerSlot;
use crate::types::DeleteTask;
use crate::types::token::PipelineCancellationToken;

pub mod riak;

/// Type alias for a boxed Storage trait object.
pub type Storage = Box<dyn StorageTrait + Send + Sync>;

/// The store operations the deletion pipeline needs.
///
/// The pipeline only talks to this trait, so tests can substitute a mock.
#[async_trait]
pub trait StorageTrait: DynClone {
    /// Stream every key of `bucket` into `sender`, in the order the store
    /// emits them, and return how many were sent.
    ///
    /// Implementations close `sender` when they return.
    async fn list_keys(&self, bucket: &str, sender: Sender<String>) -> Result<u64>;

    /// Delete one key using the connection held by `slot`.
    ///
    /// A key that does not exist fails with
    /// [`RiakError::UnknownKey`](crate::types::error::RiakError::UnknownKey).
    async fn delete_key(&self, slot: &mut WorkerSlot, task: &DeleteTask) -> Result<()>;
}

dyn_clone::clone_trait_object!(StorageTrait);

// Default refill interval 100ms
const REFILL_PER_INTERVAL_DIVIDER: usize = 10;

/// Build the shared delete rate limiter, if one is configured.
pub fn create_rate_limiter(rate_limit_objects: Option<u32>) -> Option<Arc<RateLimiter>> {
    rate_limit_objects.map(|rate_limit_value| {
        let refill = if (rate_limit_value as usize) <= REFILL_PER_INTERVAL_DIVIDER {
            1
        } else {
            rate_limit_value as usize / REFILL_PER_INTERVAL_DIVIDER
        };
        Arc::new(
            RateLimiter::builder()
                .max(rate_limit_value as usize)
                .initial(rate_limit_value as usize)
                .refill(refill)
                .fair(true)
                .build(),
        )
    })
}

/// Create the Riak storage for the deletion pipeline.
pub fn create_storage(
    config: &Config,
    cancellation_token: PipelineCancellationToken,
) -> Result<Storage> {
    let rate_limit_objects_per_sec = create_rate_limiter(config.rate_limit_objects);
    let storage = riak::RiakStorage::new(config, cancellation_token, rate_limit_objects_per_sec)?;
    Ok(Box::new(storage))
}
