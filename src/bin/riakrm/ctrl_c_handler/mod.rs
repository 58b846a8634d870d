// Ctrl+C stops enumeration and the issuing of new deletes. Deletes already
// in flight still finish before the pipeline returns.

use riakrm_rs::PipelineCancellationToken;
use tokio::task::JoinHandle;
use tokio::{select, signal};
use tracing::{debug, warn};

pub fn spawn_ctrl_c_handler(cancellation_token: PipelineCancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        select! {
            _ = cancellation_token.cancelled() => {
                debug!("cancellation_token canceled.")
            }
            _ = signal::ctrl_c() => {
                warn!("ctrl-c received, waiting for in-flight deletes.");
                cancellation_token.cancel();
            }
        }
    })
}
