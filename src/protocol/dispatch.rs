//! Status-code dispatcher.
//!
//! Every operation declares an [`OutcomeTable`]: the status codes it
//! understands, each mapped to a handler, plus an optional wildcard for
//! everything else. [`dispatch`] sends a request and hands the response to
//! exactly one handler.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;

use anyhow::Result;
use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use http::StatusCode;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use tracing::{debug, trace};

use crate::protocol::connection::Connection;
use crate::protocol::request::Request;
use crate::types::error::RiakError;

/// Error type of a streamed response body.
pub type BodyError = Box<dyn std::error::Error + Send + Sync>;
/// Type-erased streaming response body.
pub type ResponseBody = BoxBody<Bytes, BodyError>;
pub type RiakResponse = http::Response<ResponseBody>;

type Handler<T> = Box<dyn FnOnce(RiakResponse) -> BoxFuture<'static, Result<T>> + Send>;

/// Upper bound on the body bytes logged for an unexpected response.
const MAX_DUMP_BYTES: usize = 4096;

/// Status code to handler map with an optional wildcard.
pub struct OutcomeTable<T> {
    operation: &'static str,
    handlers: HashMap<StatusCode, Handler<T>>,
    otherwise: Option<Handler<T>>,
}

impl<T: Send + 'static> OutcomeTable<T> {
    /// `operation` names the call in unhandled-response errors.
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            handlers: HashMap::new(),
            otherwise: None,
        }
    }

    pub fn on<F, Fut>(mut self, status: StatusCode, handler: F) -> Self
    where
        F: FnOnce(RiakResponse) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.handlers
            .insert(status, Box::new(move |response| handler(response).boxed()));
        self
    }

    /// Map `status` straight to a value without looking at the body.
    pub fn on_value(self, status: StatusCode, value: T) -> Self {
        self.on(status, move |_| async move { Ok(value) })
    }

    /// Map `status` straight to an error.
    pub fn on_error(self, status: StatusCode, error: RiakError) -> Self {
        self.on(status, move |_| async move { Err(anyhow::Error::from(error)) })
    }

    /// Wildcard handler for codes with no entry of their own.
    pub fn otherwise<F, Fut>(mut self, handler: F) -> Self
    where
        F: FnOnce(RiakResponse) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.otherwise = Some(Box::new(move |response| handler(response).boxed()));
        self
    }

    /// Wildcard that logs the unexpected response before failing with its
    /// status code.
    pub fn otherwise_dump(self) -> Self {
        let operation = self.operation;
        self.otherwise(move |response| async move {
            let status = response.status();
            let (parts, body) = response.into_parts();
            let excerpt = read_excerpt(body, MAX_DUMP_BYTES).await;
            debug!(
                operation = operation,
                status = status.as_u16(),
                headers = format!("{:?}", parts.headers),
                body = String::from_utf8_lossy(&excerpt).to_string(),
                "unexpected response."
            );
            Err(anyhow::Error::from(RiakError::unhandled(status, operation)))
        })
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn handles(&self, status: StatusCode) -> bool {
        self.handlers.contains_key(&status) || self.otherwise.is_some()
    }

    /// Hand the response to the entry for its status, else to the wildcard,
    /// else fail with an unhandled-response error.
    pub async fn route(mut self, response: RiakResponse) -> Result<T> {
        let status = response.status();
        let handler = self.handlers.remove(&status).or(self.otherwise.take());
        match handler {
            Some(handler) => {
                trace!(operation = self.operation, status = status.as_u16(), "routing response.");
                handler(response).await
            }
            None => Err(RiakError::unhandled(status, self.operation).into()),
        }
    }
}

/// Send `request` and route the response through `table`.
///
/// With `connection` absent a fresh connection is dialed for this call only.
/// A supplied connection is reused as is; dial and I/O failures surface as
/// [`RiakError::Transport`] and are not retried here. The request timeout, if
/// any, bounds the wait for the response head.
pub async fn dispatch<T: Send + 'static>(
    connection: Option<&mut Connection>,
    request: &Request,
    table: OutcomeTable<T>,
) -> Result<T> {
    let wire_request = request.to_http()?;

    let mut one_shot;
    let connection = match connection {
        Some(connection) => connection,
        None => {
            one_shot = Connection::dial(request.authority(), request.scheme()).await?;
            &mut one_shot
        }
    };

    trace!(
        method = request.method().as_str(),
        target = request.path_and_query(),
        operation = table.operation(),
        "sending request."
    );

    let response = match request.timeout() {
        Some(timeout) => tokio::time::timeout(timeout, connection.send(wire_request))
            .await
            .map_err(|_| {
                RiakError::Transport(format!(
                    "{} timed out after {} ms",
                    table.operation(),
                    timeout.as_millis()
                ))
            })??,
        None => connection.send(wire_request).await?,
    };

    let response = response.map(|body| {
        body.map_err(|e| -> BodyError { Box::new(e) })
            .boxed()
    });
    table.route(response).await
}

/// A complete in-memory response body.
pub fn full_body(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into())
        .map_err(|never: Infallible| match never {})
        .boxed()
}

pub fn empty_body() -> ResponseBody {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| match never {})
        .boxed()
}

/// Read a body to the end.
pub async fn collect_body(body: ResponseBody) -> Result<Bytes> {
    let collected = body
        .collect()
        .await
        .map_err(|e| RiakError::Transport(format!("reading response body: {e}")))?;
    Ok(collected.to_bytes())
}

async fn read_excerpt(mut body: ResponseBody, limit: usize) -> Vec<u8> {
    let mut excerpt = Vec::new();
    while excerpt.len() < limit {
        match body.frame().await {
            Some(Ok(frame)) => {
                if let Ok(data) = frame.into_data() {
                    let take = data.len().min(limit - excerpt.len());
                    excerpt.extend_from_slice(&data[..take]);
                }
            }
            _ => break,
        }
    }
    excerpt
}
