//! Shared integration test infrastructure for riakrm-rs.
//!
//! [`FakeStore`] is an in-process stand-in for the store's HTTP interface,
//! served on a loopback port. It keeps buckets in memory, answers the key
//! stream in chunked JSON and sibling reads in `multipart/mixed`, and counts
//! connections and concurrent deletes so tests can check the pipeline's
//! bounds.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use riakrm_rs::config::args::build_config_from_args;
use riakrm_rs::{Config, DeleteReport, DeletionPipeline, DeletionStats, create_pipeline_cancellation_token};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const VCLOCK: &str = "a85hYGBgzGDKBVIcR4M2cgczH7HPYEpkzGNlsP";

/// Keys per `{"keys":[...]}` envelope of the key stream.
const KEYS_PER_ENVELOPE: usize = 2;

#[derive(Debug, Clone)]
pub struct StoredValue {
    pub content_type: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Default)]
struct StoreState {
    buckets: BTreeMap<String, BTreeMap<String, StoredValue>>,
    siblings: BTreeMap<(String, String), Vec<StoredValue>>,
    props: BTreeMap<String, serde_json::Value>,
    /// Listed by the key stream but not stored.
    phantom_keys: BTreeMap<String, Vec<String>>,
    failing_buckets: HashSet<String>,
    unavailable_keys: HashSet<(String, String)>,
    delete_delay: Duration,
    client_ids: Vec<String>,
}

/// Request counters, readable while the store is serving.
#[derive(Debug, Default)]
struct Counters {
    connections: AtomicUsize,
    deletes: AtomicUsize,
    deletes_in_flight: AtomicUsize,
    max_deletes_in_flight: AtomicUsize,
}

pub struct FakeStore {
    addr: SocketAddr,
    state: Arc<Mutex<StoreState>>,
    counters: Arc<Counters>,
}

impl FakeStore {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(StoreState::default()));
        let counters = Arc::new(Counters::default());

        let accept_state = state.clone();
        let accept_counters = counters.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_counters.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_connection(
                    stream,
                    accept_state.clone(),
                    accept_counters.clone(),
                ));
            }
        });

        Self {
            addr,
            state,
            counters,
        }
    }

    pub fn root_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn put(&self, bucket: &str, key: &str, body: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StoredValue {
                    content_type: "text/plain".to_string(),
                    body: body.to_vec(),
                },
            );
    }

    pub fn fill(&self, bucket: &str, count: usize) {
        for i in 0..count {
            self.put(bucket, &format!("key{i:04}"), format!("value {i}").as_bytes());
        }
    }

    pub fn add_sibling(&self, bucket: &str, key: &str, content_type: &str, body: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .siblings
            .entry((bucket.to_string(), key.to_string()))
            .or_default()
            .push(StoredValue {
                content_type: content_type.to_string(),
                body: body.to_vec(),
            });
    }

    /// Make the key stream report `key` although nothing is stored under it.
    pub fn add_phantom_key(&self, bucket: &str, key: &str) {
        self.state
            .lock()
            .unwrap()
            .phantom_keys
            .entry(bucket.to_string())
            .or_default()
            .push(key.to_string());
    }

    pub fn fail_bucket_listing(&self, bucket: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_buckets
            .insert(bucket.to_string());
    }

    pub fn make_unavailable(&self, bucket: &str, key: &str) {
        self.state
            .lock()
            .unwrap()
            .unavailable_keys
            .insert((bucket.to_string(), key.to_string()));
    }

    pub fn set_delete_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delete_delay = delay;
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .buckets
            .get(bucket)
            .map(|keys| keys.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<StoredValue> {
        self.state
            .lock()
            .unwrap()
            .buckets
            .get(bucket)
            .and_then(|keys| keys.get(key).cloned())
    }

    /// Client ids seen on write requests.
    pub fn client_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().client_ids.clone()
    }

    pub fn connections(&self) -> usize {
        self.counters.connections.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.counters.deletes.load(Ordering::SeqCst)
    }

    pub fn max_deletes_in_flight(&self) -> usize {
        self.counters.max_deletes_in_flight.load(Ordering::SeqCst)
    }

    /// Config for deleting `buckets` from this store, plus any extra CLI args.
    pub fn build_config(&self, args: &[&str]) -> Config {
        let root_url = self.root_url();
        let mut all_args = vec!["riakrm", "--root-url", root_url.as_str(), "-qq"];
        all_args.extend_from_slice(args);
        build_config_from_args(all_args).unwrap()
    }
}

/// Result of running a deletion pipeline.
#[derive(Debug)]
pub struct PipelineResult {
    pub report: DeleteReport,
    pub stats: DeletionStats,
    pub has_error: bool,
    pub has_panic: bool,
    pub errors: Vec<String>,
}

pub async fn run_pipeline(config: Config) -> PipelineResult {
    let mut pipeline = DeletionPipeline::new(config, create_pipeline_cancellation_token()).unwrap();
    let report = pipeline.run().await.unwrap();
    PipelineResult {
        report,
        stats: pipeline.get_deletion_stats(),
        has_error: pipeline.has_error(),
        has_panic: pipeline.has_panic(),
        errors: pipeline.get_error_messages().unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// HTTP handling
// ---------------------------------------------------------------------------

struct ParsedRequest {
    method: String,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl ParsedRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Decoded path segments after `/riak`.
    fn riak_segments(&self) -> Option<Vec<String>> {
        let rest = self.path.strip_prefix("/riak")?;
        Some(
            rest.split('/')
                .filter(|s| !s.is_empty())
                .map(|s| urlencoding::decode(s).unwrap().into_owned())
                .collect(),
        )
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    state: Arc<Mutex<StoreState>>,
    counters: Arc<Counters>,
) {
    let mut buf: Vec<u8> = Vec::new();
    loop {
        let Some(request) = read_request(&mut stream, &mut buf).await else {
            return;
        };
        let response = handle(&request, &state, &counters).await;
        if stream.write_all(&response).await.is_err() {
            return;
        }
    }
}

async fn read_request(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Option<ParsedRequest> {
    let head_end = loop {
        if let Some(pos) = find(buf, b"\r\n\r\n") {
            break pos;
        }
        if !read_more(stream, buf).await {
            return None;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
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
        if !read_more(stream, buf).await {
            return None;
        }
    }
    let body = buf[body_start..body_start + content_length].to_vec();
    buf.drain(..body_start + content_length);

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (target.clone(), String::new()),
    };
    let query = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    Some(ParsedRequest {
        method,
        path,
        query,
        headers,
        body,
    })
}

async fn handle(
    request: &ParsedRequest,
    state: &Arc<Mutex<StoreState>>,
    counters: &Counters,
) -> Vec<u8> {
    if matches!(request.method.as_str(), "PUT" | "POST") {
        if let Some(client_id) = request.header("x-riak-clientid") {
            state.lock().unwrap().client_ids.push(client_id.to_string());
        }
    }

    if request.path == "/" || request.path == "/ping" {
        return response(200, &[], b"OK");
    }

    let Some(segments) = request.riak_segments() else {
        return response(404, &[], b"not found");
    };

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", []) if request.query_value("buckets") == Some("true") => {
            let buckets: Vec<String> = state.lock().unwrap().buckets.keys().cloned().collect();
            json_response(&serde_json::json!({ "buckets": buckets }))
        }
        ("GET", [bucket]) if request.query_value("keys") == Some("stream") => {
            list_keys_stream(bucket, state)
        }
        ("GET", [bucket]) => get_bucket(bucket, request, state),
        ("PUT", [bucket]) => {
            let Ok(body) = serde_json::from_slice::<serde_json::Value>(&request.body) else {
                return response(400, &[], b"invalid json");
            };
            state
                .lock()
                .unwrap()
                .props
                .insert(bucket.clone(), body["props"].clone());
            response(204, &[], b"")
        }
        ("GET", [bucket, key]) => get_item(bucket, key, state),
        ("PUT" | "POST", [bucket, key]) => {
            let content_type = request
                .header("content-type")
                .unwrap_or("application/octet-stream")
                .to_string();
            state
                .lock()
                .unwrap()
                .buckets
                .entry(bucket.clone())
                .or_default()
                .insert(
                    key.clone(),
                    StoredValue {
                        content_type,
                        body: request.body.clone(),
                    },
                );
            response(204, &[], b"")
        }
        ("DELETE", [bucket, key]) => delete_item(bucket, key, state, counters).await,
        _ => response(400, &[], b"bad request"),
    }
}

fn list_keys_stream(bucket: &str, state: &Arc<Mutex<StoreState>>) -> Vec<u8> {
    let state = state.lock().unwrap();
    if state.failing_buckets.contains(bucket) {
        return response(500, &[], b"listing failed");
    }

    let mut keys: Vec<String> = state
        .buckets
        .get(bucket)
        .map(|keys| keys.keys().cloned().collect())
        .unwrap_or_default();
    keys.extend(state.phantom_keys.get(bucket).cloned().unwrap_or_default());

    let mut chunks: Vec<Vec<u8>> = vec![br#"{"props":{"name":""#.to_vec()];
    chunks[0].extend_from_slice(bucket.as_bytes());
    chunks[0].extend_from_slice(br#""}}"#);
    for batch in keys.chunks(KEYS_PER_ENVELOPE) {
        chunks.push(serde_json::to_vec(&serde_json::json!({ "keys": batch })).unwrap());
    }
    chunks.push(br#"{"keys":[]}"#.to_vec());

    chunked(200, &[("Content-Type", "application/json")], &chunks)
}

fn get_bucket(bucket: &str, request: &ParsedRequest, state: &Arc<Mutex<StoreState>>) -> Vec<u8> {
    let state = state.lock().unwrap();
    let mut document = serde_json::Map::new();
    if request.query_value("props") != Some("false") {
        let mut props = state
            .props
            .get(bucket)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({ "n_val": 3, "allow_mult": false }));
        props["name"] = serde_json::Value::String(bucket.to_string());
        document.insert("props".to_string(), props);
    }
    if request.query_value("keys") == Some("true") {
        let keys: Vec<String> = state
            .buckets
            .get(bucket)
            .map(|keys| keys.keys().cloned().collect())
            .unwrap_or_default();
        document.insert("keys".to_string(), serde_json::json!(keys));
    }
    json_response(&serde_json::Value::Object(document))
}

fn get_item(bucket: &str, key: &str, state: &Arc<Mutex<StoreState>>) -> Vec<u8> {
    let state = state.lock().unwrap();

    if let Some(siblings) = state.siblings.get(&(bucket.to_string(), key.to_string())) {
        let boundary = "sibsep";
        let mut body = b"\r\n".to_vec();
        for sibling in siblings {
            body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", sibling.content_type).as_bytes());
            body.extend_from_slice(&sibling.body);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        let content_type = format!("multipart/mixed; boundary={boundary}");
        return response(
            300,
            &[("Content-Type", &content_type), ("X-Riak-Vclock", VCLOCK)],
            &body,
        );
    }

    match state.buckets.get(bucket).and_then(|keys| keys.get(key)) {
        Some(value) => response(
            200,
            &[
                ("Content-Type", &value.content_type),
                ("X-Riak-Vclock", VCLOCK),
            ],
            &value.body,
        ),
        None => response(404, &[], b"not found"),
    }
}

async fn delete_item(
    bucket: &str,
    key: &str,
    state: &Arc<Mutex<StoreState>>,
    counters: &Counters,
) -> Vec<u8> {
    counters.deletes.fetch_add(1, Ordering::SeqCst);
    let in_flight = counters.deletes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    counters
        .max_deletes_in_flight
        .fetch_max(in_flight, Ordering::SeqCst);

    let delay = state.lock().unwrap().delete_delay;
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let result = {
        let mut state = state.lock().unwrap();
        if state
            .unavailable_keys
            .contains(&(bucket.to_string(), key.to_string()))
        {
            response(503, &[], b"unavailable")
        } else if state
            .buckets
            .get_mut(bucket)
            .and_then(|keys| keys.remove(key))
            .is_some()
        {
            response(204, &[], b"")
        } else {
            response(404, &[], b"not found")
        }
    };

    counters.deletes_in_flight.fetch_sub(1, Ordering::SeqCst);
    result
}

// ---------------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------------

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
    let reason = http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    format!("HTTP/1.1 {status} {reason}\r\n")
}

fn response(status: u16, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = status_line(status);
    for (k, v) in headers {
        out.push_str(&format!("{k}: {v}\r\n"));
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
    let mut out = out.into_bytes();
    out.extend_from_slice(body);
    out
}

fn json_response(value: &serde_json::Value) -> Vec<u8> {
    response(
        200,
        &[("Content-Type", "application/json")],
        &serde_json::to_vec(value).unwrap(),
    )
}

fn chunked(status: u16, headers: &[(&str, &str)], chunks: &[Vec<u8>]) -> Vec<u8> {
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
