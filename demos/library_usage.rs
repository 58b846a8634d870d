//! Example: Using riakrm-rs as a library.
//!
//! Reads every sibling of one key, then empties a bucket with the deletion
//! pipeline and prints the report.
//!
//! Run with:
//! ```sh
//! cargo run --example library_usage -- http://localhost:8098/ sessions user-42
//! ```

use anyhow::Result;
use http::HeaderMap;
use riakrm_rs::protocol::SiblingRecord;
use riakrm_rs::{Config, DeletionPipeline, RiakClient, create_pipeline_cancellation_token};

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let root_url = args
        .next()
        .unwrap_or_else(|| "http://localhost:8098/".to_string());
    let bucket = args.next().unwrap_or_else(|| "sessions".to_string());
    let key = args.next().unwrap_or_else(|| "user-42".to_string());

    let mut config = Config::for_buckets([bucket.clone()]);
    config.client_config.root_url = root_url;
    config.worker_size = 8;

    // Inspect the siblings of one key before it goes away.
    let client = RiakClient::new(&config.client_config)?;
    client.ping(None).await?;

    let (sender, receiver) = async_channel::bounded::<SiblingRecord>(4);
    let reader = tokio::spawn({
        let client = client.clone();
        let bucket = bucket.clone();
        async move {
            client
                .get_multi_item(&bucket, &key, HeaderMap::new(), &[], sender, None)
                .await
        }
    });
    while let Ok(sibling) = receiver.recv().await {
        let content_type = sibling.content_type().unwrap_or("?").to_string();
        let vclock = sibling.vclock().unwrap_or("-").to_string();
        let body = sibling.bytes().await?;
        println!("  sibling: {content_type}, {} bytes, vclock {vclock}", body.len());
    }
    if let Err(e) = reader.await? {
        println!("  no siblings read: {e:#}");
    }

    // Empty the bucket.
    let token = create_pipeline_cancellation_token();
    let mut pipeline = DeletionPipeline::new(config, token)?;
    let report = pipeline.run().await?;

    if pipeline.has_error() {
        for message in pipeline.get_error_messages().unwrap_or_default() {
            eprintln!("error: {message}");
        }
    }

    let stats = pipeline.get_deletion_stats();
    println!(
        "{bucket}: listed {}, deleted {}, already absent {}, failed {}",
        stats.listed,
        report.deleted,
        report.already_absent,
        report.failures.len()
    );
    for failure in &report.failures {
        println!("  {}: {}", failure.task.key, failure.message);
    }

    Ok(())
}
