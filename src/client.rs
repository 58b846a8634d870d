//! Riak HTTP client.
//!
//! Each operation builds its request, declares the status codes it
//! understands and lets the dispatcher route the response. Every operation
//! takes an optional [`Connection`]; without one a connection is dialed for
//! that call alone.

use std::time::Duration;

use anyhow::{Context, Result};
use async_channel::Sender;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use tracing::debug;

use crate::config::ClientConfig;
use crate::protocol::connection::Connection;
use crate::protocol::dispatch::{OutcomeTable, collect_body, dispatch};
use crate::protocol::keys::decode_key_stream;
use crate::protocol::props::{BucketDetails, BucketList, Properties};
use crate::protocol::request::{Endpoint, Request};
use crate::protocol::siblings::{CloseOnDrop, SiblingRecord, decode_siblings};
use crate::types::error::RiakError;

#[derive(Debug, Clone)]
pub struct RiakClient {
    endpoint: Endpoint,
    request_timeout: Option<Duration>,
}

impl RiakClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(default_client_id);
        Ok(Self {
            endpoint: Endpoint::parse(&config.root_url, client_id)?,
            request_timeout: config
                .request_timeout_milliseconds
                .map(Duration::from_millis),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn client_id(&self) -> &str {
        self.endpoint.client_id()
    }

    /// Dial a connection suitable for reuse across calls.
    pub async fn connect(&self) -> Result<Connection> {
        Connection::dial(self.endpoint.authority(), self.endpoint.scheme()).await
    }

    async fn send<T: Send + 'static>(
        &self,
        connection: Option<&mut Connection>,
        request: Request,
        table: OutcomeTable<T>,
    ) -> Result<T> {
        let request = request.or_timeout(self.request_timeout);
        dispatch(connection, &request, table).await
    }

    /// Check the store is reachable.
    pub async fn ping(&self, connection: Option<&mut Connection>) -> Result<()> {
        let table = OutcomeTable::new("Ping")
            .on_value(StatusCode::OK, ())
            .otherwise_dump();
        self.send(connection, self.endpoint.ping_request(), table)
            .await
    }

    pub async fn list_buckets(&self, connection: Option<&mut Connection>) -> Result<Vec<String>> {
        let table = OutcomeTable::new("ListBuckets")
            .on(StatusCode::OK, |response| async move {
                let body = collect_body(response.into_body()).await?;
                let list: BucketList = serde_json::from_slice(&body)
                    .map_err(|e| RiakError::Protocol(format!("invalid bucket list: {e}")))?;
                Ok::<_, anyhow::Error>(list.buckets)
            })
            .otherwise_dump();
        self.send(connection, self.endpoint.list_buckets_request(), table)
            .await
    }

    /// Fetch bucket properties and/or the full (non-streamed) key list.
    pub async fn get_bucket(
        &self,
        bucket: &str,
        props: bool,
        keys: bool,
        connection: Option<&mut Connection>,
    ) -> Result<BucketDetails> {
        let table = OutcomeTable::new("GetBucket")
            .on(StatusCode::OK, |response| async move {
                let body = collect_body(response.into_body()).await?;
                let details: BucketDetails = serde_json::from_slice(&body)
                    .map_err(|e| RiakError::Protocol(format!("invalid bucket details: {e}")))?;
                Ok::<_, anyhow::Error>(details)
            })
            .otherwise_dump();
        let request = self.endpoint.get_bucket_request(bucket, props, keys);
        self.send(connection, request, table).await
    }

    pub async fn set_bucket(
        &self,
        bucket: &str,
        props: &Properties,
        connection: Option<&mut Connection>,
    ) -> Result<()> {
        let table = OutcomeTable::new("SetBucket")
            .on_value(StatusCode::NO_CONTENT, ())
            .otherwise_dump();
        let request = self.endpoint.set_bucket_request(bucket, props)?;
        self.send(connection, request, table).await
    }

    /// Stream every key of `bucket` into `sender`.
    ///
    /// Returns the number of keys forwarded. The channel is closed when this
    /// returns, on success and on failure alike.
    pub async fn stream_keys(
        &self,
        bucket: &str,
        sender: Sender<String>,
        connection: Option<&mut Connection>,
    ) -> Result<u64> {
        let _close = CloseOnDrop(sender.clone());

        let table = OutcomeTable::new("ListKeys")
            .on(StatusCode::OK, move |response| async move {
                decode_key_stream(response.into_body(), &sender).await
            })
            .otherwise_dump();
        let request = self.endpoint.list_keys_request(bucket);
        self.send(connection, request, table)
            .await
            .with_context(|| format!("listing keys of bucket {bucket}"))
    }

    /// Read one value. `404` is [`RiakError::UnknownKey`].
    pub async fn get_item(
        &self,
        bucket: &str,
        key: &str,
        headers: HeaderMap,
        query: &[(String, String)],
        connection: Option<&mut Connection>,
    ) -> Result<SiblingRecord> {
        let table = OutcomeTable::new("GetItem")
            .on(StatusCode::OK, |response| async move {
                let (sender, receiver) = async_channel::bounded(1);
                decode_siblings(response, sender).await?;
                let record = receiver
                    .recv()
                    .await
                    .map_err(|_| RiakError::Protocol("empty item response".to_string()))?;
                Ok::<_, anyhow::Error>(record)
            })
            .on_error(StatusCode::NOT_FOUND, RiakError::UnknownKey)
            .otherwise_dump();
        let request = self
            .endpoint
            .get_item_request(bucket, key, headers, query);
        self.send(connection, request, table).await
    }

    /// Read every sibling of a key into `sender`.
    ///
    /// A single value (`200`) is forwarded as one record; `300 Multiple
    /// Choices` is decoded part by part. The channel is closed when this
    /// returns.
    pub async fn get_multi_item(
        &self,
        bucket: &str,
        key: &str,
        headers: HeaderMap,
        query: &[(String, String)],
        sender: Sender<SiblingRecord>,
        connection: Option<&mut Connection>,
    ) -> Result<()> {
        let _close = CloseOnDrop(sender.clone());

        let multi_sender = sender.clone();
        let table = OutcomeTable::new("GetMultiItem")
            .on(StatusCode::OK, move |response| decode_siblings(response, sender))
            .on(StatusCode::MULTIPLE_CHOICES, move |response| {
                decode_siblings(response, multi_sender)
            })
            .on_error(StatusCode::BAD_REQUEST, RiakError::BadRequest)
            .on_error(StatusCode::NOT_FOUND, RiakError::UnknownKey)
            .on_error(StatusCode::NOT_ACCEPTABLE, RiakError::Unacceptable)
            .on_error(StatusCode::SERVICE_UNAVAILABLE, RiakError::ServiceUnavailable)
            .otherwise_dump();
        let request = self
            .endpoint
            .get_multi_item_request(bucket, key, headers, query);
        self.send(connection, request, table).await
    }

    /// Store a value. Without headers the body is sent as
    /// `application/binary`; pass the vclock header for a conditional write.
    pub async fn put_item(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        headers: Option<HeaderMap>,
        query: &[(String, String)],
        connection: Option<&mut Connection>,
    ) -> Result<()> {
        let table = OutcomeTable::new("PutItem")
            .on_value(StatusCode::NO_CONTENT, ())
            .on_value(StatusCode::OK, ())
            .on_error(StatusCode::PRECONDITION_FAILED, RiakError::PreconditionFailed)
            .on_error(StatusCode::BAD_REQUEST, RiakError::BadRequest)
            .on_error(StatusCode::SERVICE_UNAVAILABLE, RiakError::ServiceUnavailable)
            .otherwise_dump();
        let request = self
            .endpoint
            .put_item_request(bucket, key, body, headers, query);
        self.send(connection, request, table).await
    }

    /// Delete a key. `404` is [`RiakError::UnknownKey`].
    pub async fn delete_item(
        &self,
        bucket: &str,
        key: &str,
        query: &[(String, String)],
        connection: Option<&mut Connection>,
    ) -> Result<()> {
        let table = OutcomeTable::new("DeleteItem")
            .on_value(StatusCode::NO_CONTENT, ())
            .on_error(StatusCode::NOT_FOUND, RiakError::UnknownKey)
            .on_error(StatusCode::BAD_REQUEST, RiakError::BadRequest)
            .on_error(StatusCode::SERVICE_UNAVAILABLE, RiakError::ServiceUnavailable)
            .otherwise_dump();
        let request = self.endpoint.delete_item_request(bucket, key, query);
        self.send(connection, request, table).await
    }
}

/// `<hostname>.<pid>`, identifying this process to the store.
///
/// The hostname comes from the environment (`HOSTNAME`, or `COMPUTERNAME` on
/// Windows), then from `/proc/sys/kernel/hostname` or `/etc/hostname`.
/// Characters that cannot travel in a header are dropped. When nothing usable is found the id falls back to
/// `localhost.<pid>`; pass `--client-id` to pin it instead.
pub fn default_client_id() -> String {
    let client_id = format!("{}.{}", hostname(), std::process::id());
    debug!(client_id = client_id, "using default client id.");
    client_id
}

const HOSTNAME_FILES: &[&str] = &["/proc/sys/kernel/hostname", "/etc/hostname"];

fn hostname() -> String {
    let from_env = ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|name| std::env::var(name).ok());
    let from_files = HOSTNAME_FILES
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok());

    from_env
        .chain(from_files)
        .map(|candidate| sanitize_hostname(&candidate))
        .find(|candidate| !candidate.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

fn sanitize_hostname(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| c.is_ascii_graphic())
        .collect()
}
