//! Request model and per-operation request builders.
//!
//! A [`Request`] is plain data: method, origin path, headers, query
//! parameters and an optional body of known length. It is built once per
//! logical operation by [`Endpoint`] and is immutable afterwards; the
//! dispatcher turns it into a wire request.

use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use http_body_util::Full;
use url::Url;
use urlencoding::encode;

use crate::protocol::connection::default_port;
use crate::protocol::props::Properties;
use crate::types::error::RiakError;

/// Client identifier header sent on write-type requests.
pub const CLIENT_ID_HEADER: &str = "x-riak-clientid";
/// The store's per-key version token.
pub const VCLOCK_HEADER: &str = "x-riak-vclock";

const RIAK_PATH_SEGMENT: &str = "riak";
const MULTIPART_MIXED: &str = "multipart/mixed";
const APPLICATION_JSON: &str = "application/json";
const APPLICATION_BINARY: &str = "application/binary";

/// One protocol request. Fields are only readable after construction.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    scheme: String,
    authority: String,
    path: String,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    body: Option<Bytes>,
    timeout: Option<Duration>,
}

impl Request {
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// URL scheme of the target (`http` or `riak`).
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// `host[:port]` of the target.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Value of a query parameter, if present.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn content_length(&self) -> u64 {
        self.body.as_ref().map_or(0, |b| b.len() as u64)
    }

    /// Upper bound on the wait for the response head.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Apply `timeout` unless the request already carries one.
    pub fn or_timeout(mut self, timeout: Option<Duration>) -> Self {
        if self.timeout.is_none() {
            self.timeout = timeout;
        }
        self
    }

    /// Origin-form request target: path plus encoded query string.
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.query.iter())
            .finish();
        format!("{}?{}", self.path, query)
    }

    /// Build the wire request. Caller headers are passed through untouched;
    /// only `Host` and `Content-Length` are filled in when absent.
    pub(crate) fn to_http(&self) -> Result<http::Request<Full<Bytes>>> {
        let mut builder = http::Request::builder()
            .method(self.method.clone())
            .uri(self.path_and_query());

        let headers = builder
            .headers_mut()
            .context("request builder is in an error state")?;
        headers.extend(self.headers.clone());
        if !headers.contains_key(HOST) {
            headers.insert(
                HOST,
                HeaderValue::from_str(&self.authority)
                    .map_err(|e| RiakError::InvalidConfig(format!("invalid host: {e}")))?,
            );
        }
        if self.body.is_some() && !headers.contains_key(CONTENT_LENGTH) {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(self.content_length()));
        }

        builder
            .body(Full::new(self.body.clone().unwrap_or_default()))
            .context("failed to build HTTP request")
    }
}

/// Incremental builder for [`Request`].
#[derive(Debug)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.request.headers.insert(name, value);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.request.headers.extend(headers);
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.query.push((name.into(), value.into()));
        self
    }

    pub fn query_pairs<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.request
            .query
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.request.body = Some(body.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request.timeout = timeout;
        self
    }

    pub fn build(self) -> Request {
        self.request
    }
}

/// The store's HTTP root plus the client identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    scheme: String,
    authority: String,
    root_path: String,
    client_id: String,
    client_id_header: HeaderValue,
}

/// A client id is sent verbatim as a header value, so it must be one.
pub fn client_id_header_value(client_id: &str) -> Result<HeaderValue, RiakError> {
    if client_id.is_empty() {
        return Err(RiakError::InvalidConfig("client id must not be empty".to_string()));
    }
    HeaderValue::from_str(client_id)
        .map_err(|_| RiakError::InvalidConfig(format!("client id is not a valid header value: {client_id:?}")))
}

impl Endpoint {
    /// Parse a root URL such as `http://localhost:8098/`.
    pub fn parse(root_url: &str, client_id: impl Into<String>) -> Result<Self> {
        let url = Url::parse(root_url)
            .map_err(|e| RiakError::InvalidConfig(format!("invalid root URL {root_url}: {e}")))?;
        default_port(url.scheme())?;
        let host = url
            .host_str()
            .ok_or_else(|| RiakError::InvalidConfig(format!("root URL has no host: {root_url}")))?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let client_id = client_id.into();
        let client_id_header = client_id_header_value(&client_id)?;

        Ok(Self {
            scheme: url.scheme().to_string(),
            authority,
            root_path: url.path().to_string(),
            client_id,
            client_id_header,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Start a request against `path` (already rooted). Write-type requests
    /// carry the client id header.
    pub fn request(&self, method: Method, path: String) -> RequestBuilder {
        let mut headers = HeaderMap::new();
        if method == Method::POST || method == Method::PUT {
            headers.insert(
                HeaderName::from_static(CLIENT_ID_HEADER),
                self.client_id_header.clone(),
            );
        }

        RequestBuilder {
            request: Request {
                method,
                scheme: self.scheme.clone(),
                authority: self.authority.clone(),
                path,
                headers,
                query: Vec::new(),
                body: None,
                timeout: None,
            },
        }
    }

    pub fn riak_path(&self) -> String {
        join_path(&self.root_path, &[RIAK_PATH_SEGMENT])
    }

    pub fn bucket_path(&self, bucket: &str) -> String {
        join_path(&self.root_path, &[RIAK_PATH_SEGMENT, &encode(bucket)])
    }

    /// An empty key addresses the bucket itself.
    pub fn key_path(&self, bucket: &str, key: &str) -> String {
        join_path(
            &self.root_path,
            &[RIAK_PATH_SEGMENT, &encode(bucket), &encode(key)],
        )
    }

    // There is no /riak/ on a ping.
    pub fn ping_request(&self) -> Request {
        self.request(Method::GET, join_path(&self.root_path, &[]))
            .build()
    }

    pub fn list_buckets_request(&self) -> Request {
        self.request(Method::GET, self.riak_path())
            .query("buckets", "true")
            .build()
    }

    pub fn get_bucket_request(&self, bucket: &str, props: bool, keys: bool) -> Request {
        let mut builder = self
            .request(Method::GET, self.bucket_path(bucket))
            .header(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        if !props {
            builder = builder.query("props", "false");
        }
        if keys {
            builder = builder.query("keys", "true");
        }
        builder.build()
    }

    pub fn set_bucket_request(&self, bucket: &str, props: &Properties) -> Result<Request> {
        let body = serde_json::to_vec(&serde_json::json!({ "props": props }))
            .context("failed to encode bucket properties")?;
        Ok(self
            .request(Method::PUT, self.bucket_path(bucket))
            .header(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON))
            .body(body)
            .build())
    }

    /// Streaming key listing with properties suppressed.
    pub fn list_keys_request(&self, bucket: &str) -> Request {
        self.request(Method::GET, self.bucket_path(bucket))
            .header(ACCEPT, HeaderValue::from_static(APPLICATION_JSON))
            .query("keys", "stream")
            .query("props", "false")
            .build()
    }

    pub fn get_item_request(
        &self,
        bucket: &str,
        key: &str,
        headers: HeaderMap,
        query: &[(String, String)],
    ) -> Request {
        self.request(Method::GET, self.key_path(bucket, key))
            .headers(headers)
            .query_pairs(query.iter().cloned())
            .build()
    }

    /// Like [`Endpoint::get_item_request`], but asks for all siblings with
    /// `Accept: multipart/mixed` unless the caller chose an `Accept` already.
    pub fn get_multi_item_request(
        &self,
        bucket: &str,
        key: &str,
        mut headers: HeaderMap,
        query: &[(String, String)],
    ) -> Request {
        if !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, HeaderValue::from_static(MULTIPART_MIXED));
        }
        self.get_item_request(bucket, key, headers, query)
    }

    /// Without caller headers the body is sent as `application/binary`.
    pub fn put_item_request(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        headers: Option<HeaderMap>,
        query: &[(String, String)],
    ) -> Request {
        let headers = headers.unwrap_or_else(|| {
            let mut h = HeaderMap::new();
            h.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_BINARY));
            h
        });
        self.request(Method::PUT, self.key_path(bucket, key))
            .headers(headers)
            .query_pairs(query.iter().cloned())
            .body(body)
            .build()
    }

    pub fn delete_item_request(
        &self,
        bucket: &str,
        key: &str,
        query: &[(String, String)],
    ) -> Request {
        self.request(Method::DELETE, self.key_path(bucket, key))
            .query_pairs(query.iter().cloned())
            .build()
    }
}

/// Join path segments under `root`, collapsing duplicate slashes.
fn join_path(root: &str, segments: &[&str]) -> String {
    let mut parts: Vec<&str> = root.split('/').filter(|s| !s.is_empty()).collect();
    parts.extend(
        segments
            .iter()
            .flat_map(|s| s.split('/'))
            .filter(|s| !s.is_empty()),
    );
    format!("/{}", parts.join("/"))
}
