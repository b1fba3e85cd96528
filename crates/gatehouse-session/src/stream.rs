use std::fmt;
use std::io;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;

use gatehouse_wire::varint::{encode_varint, MAX_VARINT_LEN};
use gatehouse_wire::{Message, MsgTag, VarintError, WireError};

/// Maximum accepted payload size. User records are tiny; anything near this
/// limit is a corrupt or hostile frame.
const MAX_PAYLOAD_SIZE: u64 = 1024 * 1024;

/// One framed message stream over one connection.
///
/// Wraps buffered read and write halves and applies a per-read deadline.
/// The deadline is refreshed on every `read_message` call: it bounds the
/// wait for the next message, not the lifetime of the connection.
///
/// A stream is owned by exactly one caller at a time (the pool enforces
/// this on the client side, the per-connection worker on the server side),
/// so reads never race reads and writes never race writes.
pub struct MsgStream {
    reader: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
    writer: BufWriter<Box<dyn AsyncWrite + Send + Unpin>>,
    peer: String,
    read_timeout: Duration,
    closed: bool,
}

impl MsgStream {
    /// Wrap separate read and write halves.
    pub fn from_parts<R, W>(reader: R, writer: W, peer: String, read_timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        MsgStream {
            reader: BufReader::new(Box::new(reader)),
            writer: BufWriter::new(Box::new(writer)),
            peer,
            read_timeout,
            closed: false,
        }
    }

    /// Wrap an established TCP connection.
    pub fn from_tcp(stream: TcpStream, read_timeout: Duration) -> Self {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let (reader, writer) = stream.into_split();
        Self::from_parts(reader, writer, peer, read_timeout)
    }

    /// An in-memory connected pair, for tests and local wiring.
    pub fn pair(read_timeout: Duration) -> (Self, Self) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        (
            Self::from_parts(ar, aw, "mem:a".to_string(), read_timeout),
            Self::from_parts(br, bw, "mem:b".to_string(), read_timeout),
        )
    }

    /// The peer address, for logging.
    pub fn peer_addr(&self) -> &str {
        &self.peer
    }

    /// Read one framed message.
    ///
    /// Waits at most the configured read deadline; on expiry returns
    /// [`StreamError::Timeout`] and leaves the connection open — the caller
    /// decides whether to keep it.
    pub async fn read_message(&mut self) -> Result<Message, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        match tokio::time::timeout(self.read_timeout, self.read_frame()).await {
            Ok(result) => result,
            Err(_) => Err(StreamError::Timeout),
        }
    }

    async fn read_frame(&mut self) -> Result<Message, StreamError> {
        let tag = match read_varint(&mut self.reader).await? {
            VarintRead::Value(val) => val,
            // No bytes at all: the peer closed between messages.
            VarintRead::CleanEof => return Err(StreamError::Closed),
            VarintRead::Truncated => {
                return Err(StreamError::Wire(WireError::Varint(VarintError::Truncated)))
            }
            VarintRead::TooLong => {
                return Err(StreamError::Wire(WireError::Varint(VarintError::TooLong)))
            }
        };
        let tag = MsgTag::from_u64(tag).ok_or(StreamError::Wire(WireError::UnknownTag(tag)))?;

        let len = match read_varint(&mut self.reader).await? {
            VarintRead::Value(val) => val,
            // EOF between the tag and the length is a torn frame.
            VarintRead::CleanEof | VarintRead::Truncated => {
                return Err(StreamError::Wire(WireError::Varint(VarintError::Truncated)))
            }
            VarintRead::TooLong => {
                return Err(StreamError::Wire(WireError::Varint(VarintError::TooLong)))
            }
        };
        if len > MAX_PAYLOAD_SIZE {
            return Err(StreamError::PayloadTooLarge(len));
        }

        let mut payload = vec![0u8; len as usize];
        self.reader
            .read_exact(&mut payload)
            .await
            .map_err(StreamError::Transport)?;

        Message::decode(tag, &payload).map_err(StreamError::Wire)
    }

    /// Write one framed message and flush.
    ///
    /// The frame is assembled in one buffer and written with a single call,
    /// so a short write never interleaves with another frame; any error
    /// still poisons the stream and the caller must destroy it.
    pub async fn write_message(&mut self, msg: &Message) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        let payload = msg.encode();
        let mut frame = BytesMut::with_capacity(payload.len() + 2 * MAX_VARINT_LEN);
        let mut scratch = [0u8; MAX_VARINT_LEN];
        let n = encode_varint(msg.tag().as_u64(), &mut scratch);
        frame.put_slice(&scratch[..n]);
        let n = encode_varint(payload.len() as u64, &mut scratch);
        frame.put_slice(&scratch[..n]);
        frame.put_slice(&payload);

        self.writer
            .write_all(&frame)
            .await
            .map_err(StreamError::Transport)?;
        self.writer.flush().await.map_err(StreamError::Transport)
    }

    /// Close the underlying connection. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.writer.shutdown().await;
    }
}

impl fmt::Debug for MsgStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsgStream")
            .field("peer", &self.peer)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Result of reading a varint from a stream.
enum VarintRead {
    /// Successfully read a varint value.
    Value(u64),
    /// Stream ended cleanly before any varint bytes were read.
    CleanEof,
    /// Stream ended after some varint bytes but before termination.
    Truncated,
    /// Varint exceeded the maximum length without terminating.
    TooLong,
}

async fn read_varint<R: AsyncRead + Unpin>(reader: &mut R) -> Result<VarintRead, StreamError> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;

    for bytes_read in 0..MAX_VARINT_LEN {
        let mut byte = [0u8; 1];
        match reader.read_exact(&mut byte).await {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                if bytes_read == 0 {
                    return Ok(VarintRead::CleanEof);
                }
                return Ok(VarintRead::Truncated);
            }
            Err(err) => return Err(StreamError::Transport(err)),
        }

        value |= ((byte[0] & 0x7F) as u64) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(VarintRead::Value(value));
        }
        shift += 7;
    }

    Ok(VarintRead::TooLong)
}

/// Errors surfaced by stream operations.
#[derive(Debug)]
pub enum StreamError {
    /// The read deadline expired before a message arrived.
    Timeout,
    /// The peer closed the connection, or the stream was closed locally.
    Closed,
    /// The frame announced a payload larger than the accepted maximum.
    PayloadTooLarge(u64),
    /// Transport-level read or write failure.
    Transport(io::Error),
    /// The frame or payload did not decode.
    Wire(WireError),
}

impl StreamError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, StreamError::Timeout)
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Timeout => write!(f, "read deadline expired"),
            StreamError::Closed => write!(f, "connection closed"),
            StreamError::PayloadTooLarge(len) => {
                write!(f, "payload of {} bytes exceeds limit", len)
            }
            StreamError::Transport(err) => write!(f, "transport error: {}", err),
            StreamError::Wire(err) => write!(f, "wire error: {}", err),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamError::Transport(err) => Some(err),
            StreamError::Wire(err) => Some(err),
            _ => None,
        }
    }
}
