//! Connection provider.
//!
//! A [`Connection`] is one HTTP/1.1 conversation with the store. It is
//! exclusively owned: either by a single dispatch (one-shot) or by a worker
//! slot that reuses it across requests.

use anyhow::Result;
use bytes::Bytes;
use http::uri::Authority;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::types::error::RiakError;

pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_RIAK_PORT: u16 = 8098;

/// Port used when the root URL does not name one.
pub fn default_port(scheme: &str) -> Result<u16, RiakError> {
    match scheme {
        "http" => Ok(DEFAULT_HTTP_PORT),
        "riak" => Ok(DEFAULT_RIAK_PORT),
        other => Err(RiakError::UnsupportedScheme(other.to_string())),
    }
}

/// Resolve `host[:port]` into a host and a concrete port.
pub fn resolve_authority(authority: &str, scheme: &str) -> Result<(String, u16), RiakError> {
    let default = default_port(scheme)?;
    let parsed: Authority = authority
        .parse()
        .map_err(|e| RiakError::InvalidConfig(format!("invalid host {authority}: {e}")))?;
    let host = parsed
        .host()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    Ok((host, parsed.port_u16().unwrap_or(default)))
}

pub struct Connection {
    sender: SendRequest<Full<Bytes>>,
    peer: String,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Open a TCP connection and complete the HTTP/1.1 handshake.
    ///
    /// The connection driver runs on its own task; it outlives this handle
    /// until any in-flight response body has been read.
    pub async fn dial(authority: &str, scheme: &str) -> Result<Self> {
        let (host, port) = resolve_authority(authority, scheme)?;
        let peer = format!("{host}:{port}");

        let stream = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| RiakError::Transport(format!("dial {peer}: {e}")))?;
        let _ = stream.set_nodelay(true);

        let (sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| RiakError::Transport(format!("handshake with {peer}: {e}")))?;

        let driver_peer = peer.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(peer = driver_peer, error = e.to_string(), "connection closed with error.");
            }
        });

        trace!(peer = peer, "connection established.");
        Ok(Self { sender, peer })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// True once the peer or the driver has shut the connection down.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub(crate) async fn send(
        &mut self,
        request: http::Request<Full<Bytes>>,
    ) -> Result<http::Response<Incoming>> {
        self.sender
            .ready()
            .await
            .map_err(|e| RiakError::Transport(format!("{}: {e}", self.peer)))?;
        let response = self
            .sender
            .send_request(request)
            .await
            .map_err(|e| RiakError::Transport(format!("{}: {e}", self.peer)))?;
        Ok(response)
    }
}
