//! The `transport` module is responsible for the network side of the broker.
//!
//! It defines the two framings (`codec` for the canonical binary protocol,
//! `text` for the line-oriented variant), the per-connection state machine
//! in `connection`, and the listening `server`.

pub mod codec;
pub mod connection;
pub mod server;
pub mod text;

use bytes::Bytes;
use serde::Deserialize;
use tokio::io::AsyncBufRead;

use crate::broker::message::{ConnectRequest, InboundFrame, Message, TopicId};
use crate::utils::error::{Error, Result};

pub use connection::{Connection, ConnectionState};
pub use server::{Broker, BrokerHandle};

/// Size bounds applied while reading frames. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_body_bytes: Option<usize>,
    pub max_topics: Option<usize>,
}

impl FrameLimits {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn check_body(&self, size: usize) -> Result<()> {
        match self.max_body_bytes {
            Some(max) if size > max => Err(Error::violation(format!(
                "body of {size} bytes exceeds the {max} byte limit"
            ))),
            _ => Ok(()),
        }
    }

    pub fn check_topics(&self, count: usize) -> Result<()> {
        match self.max_topics {
            Some(max) if count > max => Err(Error::violation(format!(
                "{count} topics exceed the limit of {max} per connection"
            ))),
            _ => Ok(()),
        }
    }
}

/// Which framing a connection speaks. Both sides must agree up front.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Binary,
    Text,
}

impl WireFormat {
    pub async fn read_connect<R>(
        self,
        reader: &mut R,
        limits: &FrameLimits,
    ) -> Result<ConnectRequest>
    where
        R: AsyncBufRead + Unpin,
    {
        match self {
            Self::Binary => codec::read_connect(reader, limits).await,
            Self::Text => text::read_connect(reader, limits).await,
        }
    }

    pub async fn read_frame<R>(
        self,
        reader: &mut R,
        limits: &FrameLimits,
    ) -> Result<Option<InboundFrame>>
    where
        R: AsyncBufRead + Unpin,
    {
        match self {
            Self::Binary => codec::read_frame(reader, limits).await,
            Self::Text => text::read_frame(reader, limits).await,
        }
    }

    pub fn encode_connect(self, topics: &[TopicId]) -> Result<Bytes> {
        match self {
            Self::Binary => codec::encode_connect(topics),
            Self::Text => text::encode_connect(topics),
        }
    }

    pub fn encode_message(self, topic: TopicId, body: &[u8]) -> Result<Bytes> {
        match self {
            Self::Binary => codec::encode_message(topic, body),
            Self::Text => text::encode_message(topic, body),
        }
    }

    pub fn encode_close(self) -> Bytes {
        match self {
            Self::Binary => codec::encode_close(),
            Self::Text => text::encode_close(),
        }
    }

    pub fn decode_message(self, frame: &[u8]) -> Result<Message> {
        match self {
            Self::Binary => codec::decode_message(frame),
            Self::Text => text::decode_message(frame),
        }
    }
}
