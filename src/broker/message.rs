//! Message definitions shared by the codec, the broker and the client.
//!
//! Topics are plain `u32` routing keys. `0` is reserved: a message frame for
//! topic `0` asks the broker to close the sending connection and is never
//! fanned out.

use bytes::Bytes;

pub type TopicId = u32;

/// Reserved topic signalling a voluntary close.
pub const CLOSE_TOPIC: TopicId = 0;

/// A published message as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: TopicId,
    pub body: Bytes,
}

impl Message {
    pub fn new(topic: TopicId, body: impl Into<Bytes>) -> Self {
        Self {
            topic,
            body: body.into(),
        }
    }

    pub fn is_close(&self) -> bool {
        self.topic == CLOSE_TOPIC
    }
}

/// The handshake a client sends once, before any message frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    pub topics: Vec<TopicId>,
}

impl ConnectRequest {
    pub fn new(topics: impl Into<Vec<TopicId>>) -> Self {
        Self {
            topics: topics.into(),
        }
    }
}

/// A frame read off the wire, keeping the exact bytes received.
///
/// `raw` is what gets relayed to subscribers; `body` is a view into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub topic: TopicId,
    pub raw: Bytes,
    pub body: Bytes,
}

impl InboundFrame {
    pub fn is_close(&self) -> bool {
        self.topic == CLOSE_TOPIC
    }

    pub fn into_message(self) -> Message {
        Message {
            topic: self.topic,
            body: self.body,
        }
    }
}
