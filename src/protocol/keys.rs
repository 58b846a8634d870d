//! Key enumeration streamer.
//!
//! A streamed key listing is a sequence of concatenated JSON documents
//! (`{"props":{}}{"keys":["a","b"]}{"keys":[]}...`) whose boundaries have no
//! relation to transport chunk boundaries. Documents are decoded as soon as
//! they are complete and their keys forwarded in order.

use anyhow::Result;
use async_channel::Sender;
use bytes::{Buf, BytesMut};
use http_body_util::BodyExt;
use tracing::trace;

use crate::protocol::dispatch::ResponseBody;
use crate::types::KeyBatchEnvelope;
use crate::types::error::RiakError;

/// Buffers partial input and yields every complete envelope.
#[derive(Debug, Default)]
pub struct EnvelopeDecoder {
    buf: BytesMut,
    /// A `}` arrived since the last parse attempt. Every document ends with
    /// one, so without it the pending tail cannot have completed.
    closed_since_attempt: bool,
}

impl EnvelopeDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if chunk.contains(&b'}') {
            self.closed_since_attempt = true;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Decode all complete envelopes in the buffer, keeping any incomplete
    /// tail for the next call.
    pub fn decode_available(&mut self) -> Result<Vec<KeyBatchEnvelope>> {
        let mut envelopes = Vec::new();
        if !self.closed_since_attempt {
            return Ok(envelopes);
        }
        self.closed_since_attempt = false;

        let mut consumed = 0;
        {
            let mut stream =
                serde_json::Deserializer::from_slice(&self.buf).into_iter::<KeyBatchEnvelope>();
            loop {
                match stream.next() {
                    Some(Ok(envelope)) => {
                        consumed = stream.byte_offset();
                        envelopes.push(envelope);
                    }
                    Some(Err(e)) if e.is_eof() => break,
                    Some(Err(e)) => {
                        return Err(RiakError::Protocol(format!("invalid key listing: {e}")).into());
                    }
                    None => {
                        consumed = stream.byte_offset();
                        break;
                    }
                }
            }
        }
        self.buf.advance(consumed);
        Ok(envelopes)
    }

    /// End of input: anything left other than whitespace is a truncated
    /// document.
    pub fn finish(&self) -> Result<()> {
        if self.buf.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        Err(RiakError::Protocol(format!(
            "key listing ended inside a document ({} bytes pending)",
            self.buf.len()
        ))
        .into())
    }
}

/// Forward every key of a streamed listing to `sender`, in arrival order.
///
/// Returns the number of keys forwarded. Ends cleanly at end of stream; a
/// receiver that went away stops the stream with [`RiakError::Cancelled`].
pub async fn decode_key_stream(mut body: ResponseBody, sender: &Sender<String>) -> Result<u64> {
    let mut decoder = EnvelopeDecoder::new();
    let mut forwarded = 0u64;

    loop {
        let frame = match body.frame().await {
            None => break,
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                return Err(RiakError::Transport(format!("reading key listing: {e}")).into());
            }
        };
        let Ok(data) = frame.into_data() else {
            continue;
        };
        decoder.push(&data);

        for envelope in decoder.decode_available()? {
            if envelope.props.is_some() {
                trace!("key listing carried bucket properties.");
            }
            for key in envelope.keys {
                if sender.send(key).await.is_err() {
                    return Err(RiakError::Cancelled.into());
                }
                forwarded += 1;
            }
        }
    }

    decoder.finish()?;
    Ok(forwarded)
}
