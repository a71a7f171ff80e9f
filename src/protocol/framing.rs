//! Stream Framing and Unit Detection
//!
//! Splits the producer byte stream into its two unit kinds: self-delimited
//! control messages and the raw payload segments that follow `<print>` jobs.
//! While a payload is outstanding the reader returns raw chunks and performs
//! no XML inspection at all; message boundaries are matched on the exact
//! blank-line delimiter, never inferred from content.

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::constants::{MAX_PAYLOAD_BYTES, MESSAGE_DELIMITER};

/// Framing failures. All of them are terminal for the session.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("stream closed mid-message with {buffered} bytes buffered")]
    TruncatedMessage { buffered: usize },

    #[error("control message exceeded {limit} bytes without a delimiter")]
    MessageTooLarge { limit: usize },

    #[error("stream closed with {remaining} payload bytes outstanding")]
    PayloadTruncated { remaining: u64 },

    #[error("declared payload of {declared} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { declared: u64, limit: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One unit read from the stream.
#[derive(Debug)]
pub enum Unit {
    /// A complete control message, trailing delimiter included.
    Control(Bytes),
    /// A chunk of binary payload; a segment may span many chunks.
    Payload(Bytes),
    /// Clean end of stream at a unit boundary.
    Eof,
}

/// Reads framed units from a byte source.
///
/// The payload counter is owned exclusively by this reader (and thus by the
/// one pump driving it); there is no shared framing state anywhere else.
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    pending_payload: u64,
    max_message_bytes: usize,
    chunk_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_message_bytes: usize, chunk_size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(chunk_size),
            pending_payload: 0,
            max_message_bytes,
            chunk_size,
        }
    }

    /// Arm the payload counter after forwarding a `<print>` message.
    ///
    /// A declared length beyond the image cap is rejected up front; a
    /// `datasize` that large is not a real job.
    pub fn set_pending_payload(&mut self, bytes: u64) -> Result<(), FrameError> {
        if bytes > MAX_PAYLOAD_BYTES {
            return Err(FrameError::PayloadTooLarge {
                declared: bytes,
                limit: MAX_PAYLOAD_BYTES,
            });
        }
        self.pending_payload = bytes;
        Ok(())
    }

    /// Payload bytes still owed before the next control message.
    pub fn pending_payload(&self) -> u64 {
        self.pending_payload
    }

    /// Read the next unit from the stream.
    pub async fn read_unit(&mut self) -> Result<Unit, FrameError> {
        if self.pending_payload > 0 {
            self.read_payload_chunk().await
        } else {
            self.read_control().await
        }
    }

    /// Return the next chunk of outstanding payload, verbatim.
    async fn read_payload_chunk(&mut self) -> Result<Unit, FrameError> {
        // Bytes pulled in past the last delimiter belong to the payload and
        // must be drained before touching the socket again.
        if !self.buf.is_empty() {
            let take = (self.buf.len() as u64).min(self.pending_payload) as usize;
            let chunk = self.buf.split_to(take).freeze();
            self.pending_payload -= take as u64;
            return Ok(Unit::Payload(chunk));
        }

        // `take` bounds the read at the declared length so bytes of the next
        // control message can never be consumed as payload.
        let want = self.pending_payload.min(self.chunk_size as u64);
        let mut chunk = BytesMut::with_capacity(want as usize);
        let n = (&mut self.inner).take(want).read_buf(&mut chunk).await?;
        if n == 0 {
            return Err(FrameError::PayloadTruncated {
                remaining: self.pending_payload,
            });
        }
        self.pending_payload -= n as u64;
        Ok(Unit::Payload(chunk.freeze()))
    }

    /// Buffer until the blank-line delimiter and return the whole message.
    async fn read_control(&mut self) -> Result<Unit, FrameError> {
        loop {
            if let Some(end) = find_delimiter(&self.buf) {
                return Ok(Unit::Control(self.buf.split_to(end).freeze()));
            }

            if self.buf.len() > self.max_message_bytes {
                return Err(FrameError::MessageTooLarge {
                    limit: self.max_message_bytes,
                });
            }

            self.buf.reserve(self.chunk_size);
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(Unit::Eof);
                }
                return Err(FrameError::TruncatedMessage {
                    buffered: self.buf.len(),
                });
            }
        }
    }
}

/// Find the end of the first blank-line delimiter (`\n\n`, tolerating CRLF
/// line endings as `\n\r\n`). Returns the index one past the delimiter.
fn find_delimiter(buf: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i..].starts_with(MESSAGE_DELIMITER) {
            return Some(i + MESSAGE_DELIMITER.len());
        }
        if buf[i] == b'\n' && buf[i + 1] == b'\r' && buf.get(i + 2) == Some(&b'\n') {
            return Some(i + 3);
        }
        i += 1;
    }
    None
}
