/*!
# Overview
riakrm-rs is a client for the Riak HTTP key/value interface with a fast
bulk delete pipeline on top of it.

## Features
- **Status-code dispatch**: every operation is an outcome table mapping HTTP
  status codes to typed results; an unexpected status is an error, never a
  silent success
- **Sibling decoding**: `300 Multiple Choices` bodies (`multipart/mixed`) are
  streamed part by part, each sibling carrying the parent's vector clock
- **Streaming key listing**: `?keys=stream` chunked JSON is decoded one
  envelope at a time, keys flow out as they arrive
- **Bounded bulk delete**: a fixed pool of worker slots caps deletes in
  flight, each slot reusing its own connection
- **Library-First**: the `riakrm` CLI is a thin wrapper over this crate

## As a Library

```toml
[dependencies]
riakrm-rs = "0.1"
tokio = { version = "1", features = ["full"] }
```

```no_run
use riakrm_rs::config::Config;
use riakrm_rs::config::args::parse_from_args;
use riakrm_rs::pipeline::DeletionPipeline;
use riakrm_rs::types::token::create_pipeline_cancellation_token;

#[tokio::main]
async fn main() {
    let args = vec!["riakrm", "--worker-size", "16", "sessions"];

    let parsed_args = parse_from_args(args).unwrap();
    let config = Config::try_from(parsed_args).unwrap();
    let cancellation_token = create_pipeline_cancellation_token();
    let mut pipeline = DeletionPipeline::new(config, cancellation_token).unwrap();
    let report = pipeline.run().await.unwrap();

    if pipeline.has_error() {
        eprintln!("{:?}", pipeline.get_errors_and_consume().unwrap()[0]);
    }
    println!("{} keys deleted", report.deleted);
}
```

The client can also be used on its own:

```no_run
use riakrm_rs::RiakClient;
use riakrm_rs::config::ClientConfig;

# async fn example() -> anyhow::Result<()> {
let client = RiakClient::new(&ClientConfig::default())?;
client.ping(None).await?;
let buckets = client.list_buckets(None).await?;
# Ok(())
# }
```
*/

#![allow(clippy::collapsible_if)]

pub mod client;
pub mod config;
pub mod deleter;
pub mod lister;
pub mod pipeline;
pub mod protocol;
pub mod slot;
pub mod stage;
pub mod storage;
pub mod terminator;
pub mod types;

#[cfg(test)]
mod test_utils;

pub use client::RiakClient;
pub use config::Config;
pub use pipeline::{DeletionPipeline, delete_all};
pub use types::error::RiakError;
pub use types::token::{PipelineCancellationToken, create_pipeline_cancellation_token};
pub use types::{DeleteReport, DeletionStats};
