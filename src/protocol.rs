//! Dispatcher ↔ Worker Service wire protocol
//!
//! Plain TCP, one message per connection:
//!
//! 1. The dispatcher connects and writes one line: either a JSON-encoded [`Job`]
//!    (`{"name":..,"directory":..,"url":..}`) or the shutdown sentinel `END`.
//!    The message ends with `\n`, with the sender half-closing the connection, or
//!    as soon as the bytes received form a complete sentinel or JSON object.
//! 2. The worker replies with the literal `OK` and closes the connection.
//!
//! Anything other than `OK` (including a dropped connection) is a failed attempt
//! from the dispatcher's point of view. A JSON object can never serialize to the
//! bare token `END`, so the sentinel cannot collide with a job payload.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;
use crate::types::Job;

/// Token that tells a Worker Service to stop accepting jobs and drain
pub const SHUTDOWN_SENTINEL: &str = "END";

/// Positive acknowledgment sent by a Worker Service
pub const ACK: &[u8] = b"OK";

/// Longest reply the dispatcher is willing to read
pub const MAX_REPLY_BYTES: u64 = 64;

/// One message on the wire
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// A job to enqueue
    Job(Job),
    /// The shutdown sentinel
    Shutdown,
}

impl Message {
    /// Serialize the message as a single newline-terminated line
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = match self {
            Message::Job(job) => serde_json::to_vec(job)?,
            Message::Shutdown => SHUTDOWN_SENTINEL.as_bytes().to_vec(),
        };
        line.push(b'\n');
        Ok(line)
    }

    /// Decode one raw message
    ///
    /// Surrounding whitespace (including the line terminator) is ignored. A decoded
    /// job must also pass [`Job::validate`].
    pub fn decode(raw: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(raw).map_err(|_| ProtocolError::NotUtf8)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ProtocolError::Empty);
        }
        if text == SHUTDOWN_SENTINEL {
            return Ok(Message::Shutdown);
        }

        let job: Job = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
        job.validate().map_err(ProtocolError::InvalidJob)?;
        Ok(Message::Job(job))
    }

    /// Short label for logs
    pub fn label(&self) -> &str {
        match self {
            Message::Job(job) => &job.name,
            Message::Shutdown => SHUTDOWN_SENTINEL,
        }
    }
}

/// Read one raw message of at most `limit` bytes
///
/// Returns as soon as the bytes received so far form a whole message: a `\n`
/// terminator, the bare sentinel, or one complete JSON value. Senders that write an
/// unterminated payload and then wait for the reply are answered without needing a
/// half-close. End of stream also ends the message.
pub async fn read_message<R>(reader: R, limit: usize) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    // One byte of slack tells an exactly-full message apart from an oversized one
    let mut reader = reader.take(limit as u64 + 1);
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Err(ProtocolError::Empty);
            }
            return Ok(buf);
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = buf.iter().position(|&b| b == b'\n') {
            buf.truncate(end + 1);
        }
        let content_len = if buf.last() == Some(&b'\n') {
            buf.len() - 1
        } else {
            buf.len()
        };
        if content_len > limit {
            return Err(ProtocolError::TooLarge { limit });
        }
        if buf.last() == Some(&b'\n') || is_complete(&buf) {
            return Ok(buf);
        }
    }
}

/// True once `buf` holds a whole message that needs no further bytes to decode
///
/// Anything that can no longer become valid (a JSON syntax error) also counts as
/// complete, so it is rejected right away instead of after the read timeout.
fn is_complete(buf: &[u8]) -> bool {
    let text = buf.trim_ascii();
    if text.is_empty() {
        return false;
    }
    if SHUTDOWN_SENTINEL.as_bytes().starts_with(text) {
        return text == SHUTDOWN_SENTINEL.as_bytes();
    }
    match serde_json::Deserializer::from_slice(text)
        .into_iter::<serde::de::IgnoredAny>()
        .next()
    {
        Some(Ok(_)) => true,
        Some(Err(e)) => !e.is_eof(),
        None => false,
    }
}

/// Send the positive acknowledgment and close the write side
pub async fn write_ack<W>(writer: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(ACK).await?;
    writer.flush().await?;
    writer.shutdown().await
}

/// Read the worker's reply until it closes the connection
pub async fn read_reply<R>(reader: R) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    reader.take(MAX_REPLY_BYTES).read_to_end(&mut buf).await?;
    Ok(buf)
}

/// True if `reply` is exactly the positive acknowledgment
pub fn is_ack(reply: &[u8]) -> bool {
    reply == ACK
}
