//! Client helper
//!
//! `PubSubClient` opens a TCP connection to a broker, sends the connect
//! handshake and then offers `publish`, `receive`/`messages` and `close`.
//! After `close` every operation fails with `Error::NotConnected`.

use std::net::SocketAddr;

use futures::Stream;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

use crate::broker::message::{CLOSE_TOPIC, Message, TopicId};
use crate::transport::{FrameLimits, WireFormat};
use crate::utils::error::{Error, Result};

#[derive(Debug)]
pub struct PubSubClient {
    format: WireFormat,
    limits: FrameLimits,
    peer: SocketAddr,
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: Option<OwnedWriteHalf>,
}

impl PubSubClient {
    /// Connect using the binary framing and subscribe to `topics`.
    pub async fn connect<A: ToSocketAddrs>(addr: A, topics: &[TopicId]) -> Result<Self> {
        Self::connect_with(addr, topics, WireFormat::Binary).await
    }

    pub async fn connect_with<A: ToSocketAddrs>(
        addr: A,
        topics: &[TopicId],
        format: WireFormat,
    ) -> Result<Self> {
        if topics.contains(&CLOSE_TOPIC) {
            return Err(Error::violation("topic 0 is reserved"));
        }
        let stream = TcpStream::connect(addr)
            .await
            .map_err(Error::ConnectionReset)?;
        stream.set_nodelay(true).map_err(Error::ConnectionReset)?;
        let peer = stream.peer_addr().map_err(Error::ConnectionReset)?;
        let (read_half, mut write_half) = stream.into_split();

        let handshake = format.encode_connect(topics)?;
        write_half
            .write_all(&handshake)
            .await
            .map_err(Error::ConnectionReset)?;
        debug!("Connected to {peer}, subscribed to {topics:?}");

        Ok(Self {
            format,
            limits: FrameLimits::unbounded(),
            peer,
            reader: Some(BufReader::new(read_half)),
            writer: Some(write_half),
        })
    }

    /// Bound the size of frames accepted by `receive`.
    pub fn with_limits(mut self, limits: FrameLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    /// Send one message frame.
    pub async fn publish(&mut self, topic: TopicId, body: impl AsRef<[u8]>) -> Result<()> {
        if topic == CLOSE_TOPIC {
            return Err(Error::violation("cannot publish to the reserved topic 0"));
        }
        let writer = self.writer.as_mut().ok_or(Error::NotConnected)?;
        let frame = self.format.encode_message(topic, body.as_ref())?;
        writer
            .write_all(&frame)
            .await
            .map_err(Error::ConnectionReset)
    }

    /// Wait for the next message.
    ///
    /// `Ok(None)` means the broker closed the connection.
    pub async fn receive(&mut self) -> Result<Option<Message>> {
        let reader = self.reader.as_mut().ok_or(Error::NotConnected)?;
        match self.format.read_frame(reader, &self.limits).await {
            Ok(Some(frame)) => Ok(Some(frame.into_message())),
            Ok(None) => {
                self.reader = None;
                Ok(None)
            }
            Err(e) => {
                self.reader = None;
                Err(e)
            }
        }
    }

    /// Incoming messages as a stream.
    ///
    /// The stream ends when the broker closes the connection or right after
    /// yielding the first error. Calling `messages` again picks up where the
    /// previous stream stopped.
    pub fn messages(&mut self) -> impl Stream<Item = Result<Message>> + '_ {
        futures::stream::unfold(Some(self), |client| async move {
            let client = client?;
            match client.receive().await {
                Ok(Some(message)) => Some((Ok(message), Some(client))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Send the close signal and release the socket.
    pub async fn close(&mut self) -> Result<()> {
        let mut writer = self.writer.take().ok_or(Error::NotConnected)?;
        self.reader = None;
        let sent = writer.write_all(&self.format.encode_close()).await;
        let _ = writer.shutdown().await;
        debug!("Closed connection to {}", self.peer);
        sent.map_err(Error::ConnectionReset)
    }
}
