// Line-oriented framing, handy with telnet/nc:
//
//   connect: "1,2,3\n"          (empty line = no topics)
//   message: "<topic>,<body>\n" (body runs to end of line)
//   close:   "goodbye\n" or "0,\n"
//
// Bodies may contain commas but never a newline.
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::broker::message::{CLOSE_TOPIC, ConnectRequest, InboundFrame, Message, TopicId};
use crate::transport::FrameLimits;
use crate::utils::error::{Error, Result};

pub const CLOSE_COMMAND: &str = "goodbye";

// Room for "<u32>," in front of the body plus "\r\n".
const LINE_OVERHEAD: usize = 10 + 1 + 2;

// Ten digits plus ", " per topic in a connect line.
const TOPIC_FIELD_LEN: usize = 10 + 2;

fn parse_topic(field: &str) -> Result<TopicId> {
    field
        .trim()
        .parse()
        .map_err(|_| Error::violation(format!("invalid topic id {field:?}")))
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

pub fn encode_connect(topics: &[TopicId]) -> Result<Bytes> {
    let list: Vec<String> = topics.iter().map(TopicId::to_string).collect();
    Ok(Bytes::from(format!("{}\n", list.join(","))))
}

pub fn decode_connect(line: &[u8]) -> Result<ConnectRequest> {
    let text = std::str::from_utf8(strip_line_ending(line))
        .map_err(|_| Error::violation("connect line is not valid UTF-8"))?;
    if text.trim().is_empty() {
        return Ok(ConnectRequest::default());
    }
    let topics = text.split(',').map(parse_topic).collect::<Result<_>>()?;
    Ok(ConnectRequest { topics })
}

pub fn encode_message(topic: TopicId, body: &[u8]) -> Result<Bytes> {
    if body.contains(&b'\n') {
        return Err(Error::violation("text frames cannot carry a newline"));
    }
    let prefix = format!("{topic},");
    let mut buf = BytesMut::with_capacity(prefix.len() + body.len() + 1);
    buf.extend_from_slice(prefix.as_bytes());
    buf.extend_from_slice(body);
    buf.extend_from_slice(b"\n");
    Ok(buf.freeze())
}

pub fn encode_close() -> Bytes {
    Bytes::from(format!("{CLOSE_COMMAND}\n"))
}

/// Split a complete line into topic and body, keeping `raw` intact.
fn split_frame(raw: Bytes) -> Result<InboundFrame> {
    let content = strip_line_ending(&raw);
    if content == CLOSE_COMMAND.as_bytes() {
        return Ok(InboundFrame {
            topic: CLOSE_TOPIC,
            body: Bytes::new(),
            raw,
        });
    }
    let comma = content
        .iter()
        .position(|b| *b == b',')
        .ok_or_else(|| Error::violation("message line has no topic separator"))?;
    let topic_field = std::str::from_utf8(&content[..comma])
        .map_err(|_| Error::violation("topic is not valid UTF-8"))?;
    let topic = parse_topic(topic_field)?;
    let body = raw.slice(comma + 1..content.len());
    Ok(InboundFrame { topic, raw, body })
}

pub fn decode_message(line: &[u8]) -> Result<Message> {
    split_frame(Bytes::copy_from_slice(line)).map(InboundFrame::into_message)
}

/// Read one `\n`-terminated line of at most `limit` bytes.
///
/// Returns an empty buffer on a clean end of stream.
async fn read_line<R>(reader: &mut R, limit: Option<usize>) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    match limit {
        Some(limit) => {
            (&mut *reader)
                .take(limit as u64)
                .read_until(b'\n', &mut line)
                .await
                .map_err(Error::ConnectionReset)?;
            if line.len() == limit && line.last() != Some(&b'\n') {
                return Err(Error::violation(format!(
                    "line exceeds the {limit} byte limit"
                )));
            }
        }
        None => {
            reader
                .read_until(b'\n', &mut line)
                .await
                .map_err(Error::ConnectionReset)?;
        }
    }
    Ok(line)
}

pub async fn read_connect<R>(reader: &mut R, limits: &FrameLimits) -> Result<ConnectRequest>
where
    R: AsyncBufRead + Unpin,
{
    let limit = limits
        .max_topics
        .map(|n| n.saturating_mul(TOPIC_FIELD_LEN).saturating_add(2));
    let line = read_line(reader, limit).await?;
    if line.is_empty() {
        return Err(Error::MalformedHeader {
            expected: 1,
            actual: 0,
        });
    }
    if line.last() != Some(&b'\n') {
        return Err(Error::TruncatedBody {
            expected: line.len() + 1,
            received: line.len(),
        });
    }
    let request = decode_connect(&line)?;
    limits.check_topics(request.topics.len())?;
    Ok(request)
}

/// Read one message line. `Ok(None)` means the peer closed between lines.
pub async fn read_frame<R>(reader: &mut R, limits: &FrameLimits) -> Result<Option<InboundFrame>>
where
    R: AsyncBufRead + Unpin,
{
    let limit = limits
        .max_body_bytes
        .map(|n| n.saturating_add(LINE_OVERHEAD));
    let line = read_line(reader, limit).await?;
    if line.is_empty() {
        return Ok(None);
    }
    if line.last() != Some(&b'\n') {
        return Err(Error::TruncatedBody {
            expected: line.len() + 1,
            received: line.len(),
        });
    }
    let frame = split_frame(Bytes::from(line))?;
    limits.check_body(frame.body.len())?;
    Ok(Some(frame))
}
