// Binary framing: little-endian u32 headers, no padding.
//
//   connect: num_topics:u32 | num_topics x topic:u32
//   message: topic:u32 | body_size:u32 | body
//
// A message for topic 0 with an empty body is the close signal.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::broker::message::{CLOSE_TOPIC, ConnectRequest, InboundFrame, Message, TopicId};
use crate::transport::FrameLimits;
use crate::utils::error::{Error, Result};

pub const CONNECT_HEADER_LEN: usize = 4;
pub const MESSAGE_HEADER_LEN: usize = 8;
const TOPIC_LEN: usize = 4;

// Upper bound for a single read reservation, so a large declared size does
// not allocate before the bytes actually arrive.
const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub topic: TopicId,
    pub body_size: u32,
}

impl MessageHeader {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.topic);
        buf.put_u32_le(self.body_size);
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.len() != MESSAGE_HEADER_LEN {
            return Err(Error::MalformedHeader {
                expected: MESSAGE_HEADER_LEN,
                actual: buf.len(),
            });
        }
        Ok(Self {
            topic: buf.get_u32_le(),
            body_size: buf.get_u32_le(),
        })
    }
}

fn wire_len(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::violation(format!("{what} length {len} exceeds u32")))
}

pub fn encode_connect(topics: &[TopicId]) -> Result<Bytes> {
    let count = wire_len(topics.len(), "topic list")?;
    let mut buf = BytesMut::with_capacity(CONNECT_HEADER_LEN + topics.len() * TOPIC_LEN);
    buf.put_u32_le(count);
    for topic in topics {
        buf.put_u32_le(*topic);
    }
    Ok(buf.freeze())
}

/// Decode a complete connect frame held in memory.
pub fn decode_connect(buf: &[u8]) -> Result<ConnectRequest> {
    if buf.len() < CONNECT_HEADER_LEN {
        return Err(Error::MalformedHeader {
            expected: CONNECT_HEADER_LEN,
            actual: buf.len(),
        });
    }
    let (mut header, mut body) = buf.split_at(CONNECT_HEADER_LEN);
    let count = header.get_u32_le() as usize;
    let expected = topic_bytes(count)?;
    if body.len() < expected {
        return Err(Error::TruncatedBody {
            expected,
            received: body.len(),
        });
    }
    if body.len() > expected {
        return Err(Error::violation(format!(
            "connect frame carries {} trailing bytes",
            body.len() - expected
        )));
    }
    let topics = (0..count).map(|_| body.get_u32_le()).collect();
    Ok(ConnectRequest { topics })
}

/// Encode one message frame; the header always matches the body length.
pub fn encode_message(topic: TopicId, body: &[u8]) -> Result<Bytes> {
    let header = MessageHeader {
        topic,
        body_size: wire_len(body.len(), "body")?,
    };
    let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_LEN + body.len());
    header.encode(&mut buf);
    buf.extend_from_slice(body);
    Ok(buf.freeze())
}

pub fn encode_close() -> Bytes {
    let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_LEN);
    MessageHeader {
        topic: CLOSE_TOPIC,
        body_size: 0,
    }
    .encode(&mut buf);
    buf.freeze()
}

/// Decode a complete message frame held in memory.
pub fn decode_message(buf: &[u8]) -> Result<Message> {
    let split = buf.len().min(MESSAGE_HEADER_LEN);
    let header = MessageHeader::decode(&buf[..split])?;
    let body = &buf[MESSAGE_HEADER_LEN..];
    let expected = header.body_size as usize;
    if body.len() < expected {
        return Err(Error::TruncatedBody {
            expected,
            received: body.len(),
        });
    }
    if body.len() > expected {
        return Err(Error::violation(format!(
            "message frame carries {} trailing bytes",
            body.len() - expected
        )));
    }
    Ok(Message::new(header.topic, Bytes::copy_from_slice(body)))
}

fn topic_bytes(count: usize) -> Result<usize> {
    count
        .checked_mul(TOPIC_LEN)
        .ok_or_else(|| Error::violation(format!("{count} topics do not fit in memory")))
}

/// Read until `buf` holds `target` bytes or the peer stops sending.
///
/// Never reads past `target`, so the next frame stays in the stream.
/// Returns the final length of `buf`.
async fn fill<R>(reader: &mut R, buf: &mut BytesMut, target: usize) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    while buf.len() < target {
        let remaining = target - buf.len();
        buf.reserve(remaining.min(READ_CHUNK));
        let n = (&mut *reader)
            .take(remaining as u64)
            .read_buf(buf)
            .await
            .map_err(Error::ConnectionReset)?;
        if n == 0 {
            break;
        }
    }
    Ok(buf.len())
}

/// Read the handshake from a stream.
pub async fn read_connect<R>(reader: &mut R, limits: &FrameLimits) -> Result<ConnectRequest>
where
    R: AsyncRead + Unpin,
{
    let mut header = BytesMut::with_capacity(CONNECT_HEADER_LEN);
    let got = fill(reader, &mut header, CONNECT_HEADER_LEN).await?;
    if got != CONNECT_HEADER_LEN {
        return Err(Error::MalformedHeader {
            expected: CONNECT_HEADER_LEN,
            actual: got,
        });
    }
    let count = header.get_u32_le() as usize;
    limits.check_topics(count)?;

    let expected = topic_bytes(count)?;
    let mut body = BytesMut::new();
    let received = fill(reader, &mut body, expected).await?;
    if received != expected {
        return Err(Error::TruncatedBody { expected, received });
    }
    let topics = (0..count).map(|_| body.get_u32_le()).collect();
    Ok(ConnectRequest { topics })
}

/// Read one message frame from a stream.
///
/// `Ok(None)` means the peer closed cleanly between frames.
pub async fn read_frame<R>(reader: &mut R, limits: &FrameLimits) -> Result<Option<InboundFrame>>
where
    R: AsyncRead + Unpin,
{
    let mut raw = BytesMut::with_capacity(MESSAGE_HEADER_LEN);
    let got = fill(reader, &mut raw, MESSAGE_HEADER_LEN).await?;
    if got == 0 {
        return Ok(None);
    }
    let header = MessageHeader::decode(&raw[..got])?;
    let body_size = header.body_size as usize;
    limits.check_body(body_size)?;

    let target = MESSAGE_HEADER_LEN + body_size;
    let total = fill(reader, &mut raw, target).await?;
    if total != target {
        return Err(Error::TruncatedBody {
            expected: body_size,
            received: total - MESSAGE_HEADER_LEN,
        });
    }

    let raw = raw.freeze();
    let body = raw.slice(MESSAGE_HEADER_LEN..);
    Ok(Some(InboundFrame {
        topic: header.topic,
        raw,
        body,
    }))
}
