//! Sibling decoder.
//!
//! A key with concurrent writes answers a multi-item read with `300 Multiple
//! Choices` and a `multipart/mixed` body, one part per sibling. Parts are
//! parsed incrementally off the response stream and forwarded one by one;
//! each part inherits the parent response's version token.

use anyhow::Result;
use async_channel::Sender;
use bytes::{Buf, Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body_util::BodyExt;
use tracing::trace;

use crate::protocol::dispatch::{ResponseBody, RiakResponse, collect_body, full_body};
use crate::protocol::request::VCLOCK_HEADER;
use crate::types::error::RiakError;

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// One version of a key's value.
#[derive(Debug)]
pub struct SiblingRecord {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
}

impl SiblingRecord {
    fn from_response(response: RiakResponse) -> Self {
        let (parts, body) = response.into_parts();
        Self {
            status: parts.status,
            headers: parts.headers,
            body,
        }
    }

    fn from_part(mut headers: HeaderMap, body: Bytes, vclock: Option<&HeaderValue>) -> Self {
        if let Some(vclock) = vclock {
            headers.insert(HeaderName::from_static(VCLOCK_HEADER), vclock.clone());
        }
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        Self {
            status: StatusCode::OK,
            headers,
            body: full_body(body),
        }
    }

    /// `200` for a record taken from a multipart part.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The opaque version token, needed for a follow-up conditional write.
    pub fn vclock(&self) -> Option<&str> {
        self.headers
            .get(VCLOCK_HEADER)
            .and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }

    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    /// Read the whole value.
    pub async fn bytes(self) -> Result<Bytes> {
        collect_body(self.body).await
    }
}

/// Closes the channel when dropped, so the consumer sees the end of the
/// stream on every exit path.
pub(crate) struct CloseOnDrop<T>(pub(crate) Sender<T>);

impl<T> Drop for CloseOnDrop<T> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Forward the sibling records carried by `response` to `sender`.
///
/// A `200` yields a single record. Anything else must be a
/// `multipart/mixed` body; its parts are sent in order as soon as each one is
/// complete. The channel is closed when this returns, whatever the outcome.
/// A stream that ends before the closing delimiter is a protocol error;
/// records already sent stay delivered.
pub async fn decode_siblings(response: RiakResponse, sender: Sender<SiblingRecord>) -> Result<()> {
    let _close = CloseOnDrop(sender.clone());

    if response.status() == StatusCode::OK {
        let _ = sender.send(SiblingRecord::from_response(response)).await;
        return Ok(());
    }

    let boundary = multipart_boundary(response.headers())?;
    let vclock = response.headers().get(VCLOCK_HEADER).cloned();
    let mut reader = MultipartReader::new(response.into_body(), &boundary);

    let mut forwarded = 0usize;
    while let Some((headers, body)) = reader.next_part().await? {
        let record = SiblingRecord::from_part(headers, body, vclock.as_ref());
        if sender.send(record).await.is_err() {
            trace!(forwarded = forwarded, "sibling receiver dropped.");
            return Ok(());
        }
        forwarded += 1;
    }
    reader.drain().await;

    trace!(forwarded = forwarded, "siblings decoded.");
    Ok(())
}

/// Extract the boundary parameter of a `multipart/mixed` content type.
pub fn multipart_boundary(headers: &HeaderMap) -> Result<String> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| RiakError::Protocol("multipart response without Content-Type".to_string()))?;
    let mime: mime::Mime = content_type
        .parse()
        .map_err(|e| RiakError::Protocol(format!("invalid Content-Type {content_type}: {e}")))?;

    if mime.type_() != mime::MULTIPART || mime.subtype() != "mixed" {
        return Err(RiakError::Protocol(format!(
            "expected multipart/mixed, got {content_type}"
        ))
        .into());
    }
    let boundary = mime
        .get_param(mime::BOUNDARY)
        .map(|b| b.as_str().to_string())
        .filter(|b| !b.is_empty())
        .ok_or_else(|| RiakError::Protocol("multipart response without boundary".to_string()))?;
    Ok(boundary)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Preamble,
    AfterDelimiter,
    Done,
}

/// Incremental `multipart/mixed` parser over a streamed body.
struct MultipartReader {
    body: ResponseBody,
    buf: BytesMut,
    /// `--boundary`
    delimiter: Vec<u8>,
    /// `\r\n--boundary`
    body_terminator: Vec<u8>,
    state: ReaderState,
}

impl MultipartReader {
    fn new(body: ResponseBody, boundary: &str) -> Self {
        let delimiter = format!("--{boundary}").into_bytes();
        let mut body_terminator = CRLF.to_vec();
        body_terminator.extend_from_slice(&delimiter);
        Self {
            body,
            buf: BytesMut::new(),
            delimiter,
            body_terminator,
            state: ReaderState::Preamble,
        }
    }

    /// Pull the next data frame into the buffer. `false` at end of stream.
    async fn fill(&mut self) -> Result<bool> {
        loop {
            match self.body.frame().await {
                None => return Ok(false),
                Some(Err(e)) => {
                    return Err(RiakError::Transport(format!("reading multipart body: {e}")).into());
                }
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        if !data.is_empty() {
                            self.buf.extend_from_slice(&data);
                            return Ok(true);
                        }
                    }
                }
            }
        }
    }

    async fn ensure(&mut self, len: usize, what: &str) -> Result<()> {
        while self.buf.len() < len {
            if !self.fill().await? {
                return Err(truncated(what));
            }
        }
        Ok(())
    }

    async fn skip_preamble(&mut self) -> Result<()> {
        let mut scan_from = 0;
        loop {
            if let Some(pos) = find_from(&self.buf, &self.delimiter, scan_from) {
                if pos == 0 || self.buf[..pos].ends_with(CRLF) {
                    self.buf.advance(pos + self.delimiter.len());
                    return Ok(());
                }
                scan_from = pos + 1;
                continue;
            }
            scan_from = self.buf.len().saturating_sub(self.delimiter.len());
            if !self.fill().await? {
                return Err(truncated("first boundary"));
            }
        }
    }

    /// After a delimiter: `--` closes the body, otherwise optional padding
    /// and a line break open the next part.
    async fn after_delimiter(&mut self) -> Result<bool> {
        self.ensure(2, "boundary line").await?;
        if self.buf.starts_with(b"--") {
            self.state = ReaderState::Done;
            return Ok(false);
        }
        loop {
            self.ensure(1, "boundary line").await?;
            match self.buf[0] {
                b' ' | b'\t' => self.buf.advance(1),
                _ => break,
            }
        }
        self.ensure(2, "boundary line").await?;
        if !self.buf.starts_with(CRLF) {
            return Err(RiakError::Protocol("malformed multipart boundary line".to_string()).into());
        }
        self.buf.advance(2);
        Ok(true)
    }

    async fn read_headers(&mut self) -> Result<HeaderMap> {
        self.ensure(2, "part headers").await?;
        if self.buf.starts_with(CRLF) {
            self.buf.advance(2);
            return Ok(HeaderMap::new());
        }

        let mut scan_from = 0;
        let end = loop {
            if let Some(pos) = find_from(&self.buf, HEADER_END, scan_from) {
                break pos;
            }
            scan_from = self.buf.len().saturating_sub(HEADER_END.len());
            if !self.fill().await? {
                return Err(truncated("part headers"));
            }
        };

        let block = self.buf.split_to(end + HEADER_END.len());
        parse_part_headers(&block[..end])
    }

    async fn read_part_body(&mut self) -> Result<Bytes> {
        let mut scan_from = 0;
        let end = loop {
            if let Some(pos) = find_from(&self.buf, &self.body_terminator, scan_from) {
                break pos;
            }
            scan_from = self.buf.len().saturating_sub(self.body_terminator.len());
            if !self.fill().await? {
                return Err(truncated("part body"));
            }
        };

        let body = self.buf.split_to(end).freeze();
        self.buf.advance(self.body_terminator.len());
        Ok(body)
    }

    /// Next complete part, or `None` once the closing delimiter was read.
    async fn next_part(&mut self) -> Result<Option<(HeaderMap, Bytes)>> {
        if self.state == ReaderState::Preamble {
            self.skip_preamble().await?;
            self.state = ReaderState::AfterDelimiter;
        }
        if self.state == ReaderState::Done || !self.after_delimiter().await? {
            return Ok(None);
        }

        let headers = self.read_headers().await?;
        let body = self.read_part_body().await?;
        Ok(Some((headers, body)))
    }

    /// Discard the epilogue so the connection can be reused.
    async fn drain(&mut self) {
        self.buf.clear();
        while let Some(Ok(_)) = self.body.frame().await {}
    }
}

fn truncated(what: &str) -> anyhow::Error {
    RiakError::Protocol(format!(
        "multipart stream ended before the closing boundary (while reading {what})"
    ))
    .into()
}

fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || haystack.len() - from < needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

fn parse_part_headers(block: &[u8]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for line in block.split(|b| *b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let colon = line
            .iter()
            .position(|b| *b == b':')
            .ok_or_else(|| malformed_header(line))?;
        let name = HeaderName::from_bytes(line[..colon].trim_ascii())
            .map_err(|_| malformed_header(line))?;
        let value = HeaderValue::from_bytes(line[colon + 1..].trim_ascii())
            .map_err(|_| malformed_header(line))?;
        headers.append(name, value);
    }
    Ok(headers)
}

fn malformed_header(line: &[u8]) -> anyhow::Error {
    RiakError::Protocol(format!(
        "malformed part header: {}",
        String::from_utf8_lossy(line)
    ))
    .into()
}
