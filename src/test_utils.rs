//! Shared test utilities for the riakrm library crate.
//!
//! Besides the usual config and tracing helpers this hosts [`FakeRiak`], a
//! loopback HTTP/1.1 server that answers with canned raw responses and
//! records what it was sent.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_channel::Sender;
use async_trait::async_trait;
use http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::config::{ClientConfig, Config, ForceRetryConfig};
use crate::slot::WorkerSlot;
use crate::storage::StorageTrait;
use crate::types::DeleteTask;
use crate::types::error::RiakError;

/// Initialise a dummy tracing subscriber for tests.
///
/// Uses `try_init` so that only the first call in a process actually
/// installs the subscriber; subsequent calls are silently ignored.
pub(crate) fn init_dummy_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dummy=trace")
        .try_init();
}

/// Create a default [`Config`] suitable for most unit tests.
///
/// Key defaults: `worker_size=4`, bucket=`"test-bucket"`, no retries.
pub(crate) fn make_test_config() -> Config {
    Config {
        buckets: vec!["test-bucket".to_string()],
        client_config: ClientConfig {
            root_url: "http://127.0.0.1:8098/".to_string(),
            client_id: Some("test-client.1".to_string()),
            request_timeout_milliseconds: None,
        },
        worker_size: 4,
        verbose: false,
        key_queue_size: 1000,
        rate_limit_objects: None,
        force_retry_config: ForceRetryConfig {
            force_retry_count: 0,
            force_retry_interval_milliseconds: 0,
        },
        tracing_config: None,
        auto_complete_shell: None,
    }
}

/// One request as seen by [`FakeRiak`].
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: String,
    /// Request target, path plus query.
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or_default()
    }
}

type Responder = dyn Fn(&RecordedRequest) -> Vec<u8> + Send + Sync;

/// Loopback store stand-in.
pub(crate) struct FakeRiak {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    connections: Arc<AtomicUsize>,
}

impl FakeRiak {
    /// Serve every request with whatever `responder` returns. Connections are
    /// kept alive unless the response carries `Connection: close`.
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&RecordedRequest) -> Vec<u8> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let responder: Arc<Responder> = Arc::new(responder);

        let accept_requests = requests.clone();
        let accept_connections = connections.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_connection(
                    stream,
                    responder.clone(),
                    accept_requests.clone(),
                ));
            }
        });

        Self {
            addr,
            requests,
            connections,
        }
    }

    /// Accept connections but never answer.
    pub async fn start_silent() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_connections = connections.clone();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                accept_connections.fetch_add(1, Ordering::SeqCst);
                held.push(stream);
            }
        });

        Self {
            addr,
            requests: Arc::new(Mutex::new(Vec::new())),
            connections,
        }
    }

    pub fn root_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    responder: Arc<Responder>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) {
    let mut buf: Vec<u8> = Vec::new();
    loop {
        let head_end = loop {
            if let Some(pos) = find(&buf, b"\r\n\r\n") {
                break pos;
            }
            if !read_more(&mut stream, &mut buf).await {
                return;
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
        let mut lines = head.split("\r\n");
        let mut request_line = lines.next().unwrap_or_default().split(' ');
        let method = request_line.next().unwrap_or_default().to_string();
        let target = request_line.next().unwrap_or_default().to_string();
        let headers: Vec<(String, String)> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
            .collect();
        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .and_then(|(_, v)| v.parse::<usize>().ok())
            .unwrap_or(0);

        let body_start = head_end + 4;
        while buf.len() < body_start + content_length {
            if !read_more(&mut stream, &mut buf).await {
                return;
            }
        }
        let body = buf[body_start..body_start + content_length].to_vec();
        buf.drain(..body_start + content_length);

        let request = RecordedRequest {
            method,
            target,
            headers,
            body,
        };
        requests.lock().unwrap().push(request.clone());

        let response = responder(&request);
        if stream.write_all(&response).await.is_err() {
            return;
        }
        if find(&response, b"Connection: close").is_some() {
            let _ = stream.shutdown().await;
            return;
        }
    }
}

async fn read_more(stream: &mut TcpStream, buf: &mut Vec<u8>) -> bool {
    let mut chunk = [0u8; 4096];
    match stream.read(&mut chunk).await {
        Ok(0) | Err(_) => false,
        Ok(n) => {
            buf.extend_from_slice(&chunk[..n]);
            true
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn status_line(status: u16) -> String {
    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    format!("HTTP/1.1 {status} {reason}\r\n")
}

/// Raw response with a `Content-Length` body.
pub(crate) fn http_response(status: u16, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = status_line(status);
    for (k, v) in headers {
        out.push_str(&format!("{k}: {v}\r\n"));
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
    let mut out = out.into_bytes();
    out.extend_from_slice(body);
    out
}

/// Raw response using chunked transfer encoding, one chunk per slice.
pub(crate) fn chunked_response(status: u16, headers: &[(&str, &str)], chunks: &[&[u8]]) -> Vec<u8> {
    let mut out = status_line(status);
    for (k, v) in headers {
        out.push_str(&format!("{k}: {v}\r\n"));
    }
    out.push_str("Transfer-Encoding: chunked\r\n\r\n");
    let mut out = out.into_bytes();
    for chunk in chunks.iter().filter(|c| !c.is_empty()) {
        out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

/// In-memory [`StorageTrait`] for pipeline tests.
///
/// Keys listed per bucket are fixed up front. Deletes record what they were
/// asked to do and how many ran at once.
#[derive(Clone, Default)]
pub(crate) struct MockStorage {
    keys: HashMap<String, Vec<String>>,
    failing_buckets: HashSet<String>,
    missing_keys: HashSet<DeleteTask>,
    failing_keys: HashSet<DeleteTask>,
    panicking_keys: HashSet<DeleteTask>,
    delete_delay: Duration,
    deleted: Arc<Mutex<Vec<DeleteTask>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(mut self, bucket: &str, keys: &[&str]) -> Self {
        self.keys.insert(
            bucket.to_string(),
            keys.iter().map(|k| k.to_string()).collect(),
        );
        self
    }

    pub fn with_failing_bucket(mut self, bucket: &str) -> Self {
        self.failing_buckets.insert(bucket.to_string());
        self
    }

    pub fn with_missing_key(mut self, bucket: &str, key: &str) -> Self {
        self.missing_keys.insert(DeleteTask::new(bucket, key));
        self
    }

    pub fn with_failing_key(mut self, bucket: &str, key: &str) -> Self {
        self.failing_keys.insert(DeleteTask::new(bucket, key));
        self
    }

    pub fn with_panicking_key(mut self, bucket: &str, key: &str) -> Self {
        self.panicking_keys.insert(DeleteTask::new(bucket, key));
        self
    }

    pub fn with_delete_delay(mut self, delay: Duration) -> Self {
        self.delete_delay = delay;
        self
    }

    /// Tasks whose delete succeeded, in completion order.
    pub fn deleted(&self) -> Vec<DeleteTask> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageTrait for MockStorage {
    async fn list_keys(&self, bucket: &str, sender: Sender<String>) -> Result<u64> {
        if self.failing_buckets.contains(bucket) {
            sender.close();
            return Err(RiakError::unhandled(StatusCode::INTERNAL_SERVER_ERROR, "ListKeys").into());
        }

        let mut count = 0;
        for key in self.keys.get(bucket).into_iter().flatten() {
            if sender.send(key.clone()).await.is_err() {
                return Err(RiakError::Cancelled.into());
            }
            count += 1;
        }
        sender.close();
        Ok(count)
    }

    async fn delete_key(&self, _slot: &mut WorkerSlot, task: &DeleteTask) -> Result<()> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        if !self.delete_delay.is_zero() {
            tokio::time::sleep(self.delete_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panicking_keys.contains(task) {
            panic!("delete of {task} panicked");
        }
        if self.missing_keys.contains(task) {
            return Err(RiakError::UnknownKey.into());
        }
        if self.failing_keys.contains(task) {
            return Err(RiakError::ServiceUnavailable.into());
        }
        self.deleted.lock().unwrap().push(task.clone());
        Ok(())
    }
}
