//! Per-connection handler
//!
//! Each accepted socket is driven through
//! `AwaitingHandshake -> Active -> Closing -> Closed`:
//! - the first frame must be the connect handshake; its topics are registered
//!   in one registry operation
//! - every later frame is relayed byte-for-byte to the subscribers of its
//!   topic, until the close signal, an error, EOF or broker shutdown
//! - teardown always removes the connection from the registry before the
//!   socket is shut down
//!
//! Outbound traffic goes through a bounded queue drained by one writer, so
//! frames from different publishers never interleave on the socket. The
//! reader, the writer, the shutdown signal and the eviction notice are polled
//! together; whichever finishes first ends the connection.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc::Receiver;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::broker::message::{CLOSE_TOPIC, ConnectRequest, InboundFrame};
use crate::broker::registry::SharedRegistry;
use crate::broker::subscriber::Subscriber;
use crate::config::BrokerSettings;
use crate::transport::{FrameLimits, WireFormat};
use crate::utils::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingHandshake,
    Active,
    Closing,
    Closed,
}

/// Why a connection left the `Active` state without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent the close signal.
    CloseSignal,
    /// The client hung up between frames.
    PeerClosed,
    /// The broker is stopping.
    Shutdown,
    /// The outbound queue was closed underneath the writer.
    OutboundClosed,
    /// The peer stopped draining its queue and a publisher gave up on it.
    Evicted,
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub format: WireFormat,
    pub limits: FrameLimits,
    pub queue_capacity: usize,
    pub read_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from(&BrokerSettings::default())
    }
}

impl From<&BrokerSettings> for ConnectionConfig {
    fn from(settings: &BrokerSettings) -> Self {
        Self {
            format: settings.wire_format,
            limits: settings.frame_limits(),
            queue_capacity: settings.queue_capacity(),
            read_timeout: settings.read_timeout(),
        }
    }
}

/// Resolves once `stop` has been signalled or the broker handle is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn with_timeout<T>(
    limit: Option<Duration>,
    read: impl Future<Output = Result<T>>,
) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, read)
            .await
            .map_err(|_| Error::ReadTimeout(limit))?,
        None => read.await,
    }
}

async fn write_loop<W>(writer: &mut W, outbound: &mut Receiver<Bytes>) -> Result<CloseReason>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        writer
            .write_all(&frame)
            .await
            .map_err(Error::ConnectionReset)?;
    }
    Ok(CloseReason::OutboundClosed)
}

pub struct Connection {
    peer: SocketAddr,
    state: ConnectionState,
    registry: SharedRegistry,
    config: ConnectionConfig,
}

impl Connection {
    pub fn new(peer: SocketAddr, registry: SharedRegistry, config: ConnectionConfig) -> Self {
        Self {
            peer,
            state: ConnectionState::AwaitingHandshake,
            registry,
            config,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!("{} {:?} -> {:?}", self.peer, self.state, next);
        self.state = next;
    }

    /// Drive the connection until it is closed.
    ///
    /// Returns how the connection ended; errors are already logged.
    pub async fn run(
        mut self,
        stream: TcpStream,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<CloseReason> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let handshake = tokio::select! {
            request = self.read_handshake(&mut reader) => Some(request),
            _ = shutdown_requested(&mut shutdown) => None,
        };
        let request = match handshake {
            Some(Ok(request)) => request,
            Some(Err(e)) => {
                warn!("Handshake with {} failed: {e}", self.peer);
                self.transition(ConnectionState::Closed);
                return Err(e);
            }
            None => {
                self.transition(ConnectionState::Closed);
                return Ok(CloseReason::Shutdown);
            }
        };

        let (subscriber, mut outbound) = Subscriber::channel(self.config.queue_capacity);
        self.registry.register(&subscriber, &request.topics);
        info!(
            "{} ({}) subscribed to topics {:?}",
            self.peer, subscriber.id, request.topics
        );
        self.transition(ConnectionState::Active);

        let outcome = tokio::select! {
            res = self.read_loop(&mut reader) => res,
            res = write_loop(&mut write_half, &mut outbound) => res,
            _ = shutdown_requested(&mut shutdown) => Ok(CloseReason::Shutdown),
            _ = subscriber.evicted() => Ok(CloseReason::Evicted),
        };

        self.transition(ConnectionState::Closing);
        let topics = self.registry.unsubscribe_all(&subscriber.id);
        drop(subscriber);
        if let Err(e) = write_half.shutdown().await {
            debug!("Shutting down socket of {} failed: {e}", self.peer);
        }
        self.transition(ConnectionState::Closed);

        match &outcome {
            Ok(reason) => info!(
                "{} disconnected ({reason:?}), removed from topics {topics:?}",
                self.peer
            ),
            Err(e) => warn!(
                "{} dropped: {e}, removed from topics {topics:?}",
                self.peer
            ),
        }
        outcome
    }

    async fn read_handshake<R>(&self, reader: &mut R) -> Result<ConnectRequest>
    where
        R: AsyncBufRead + Unpin,
    {
        let read = self.config.format.read_connect(reader, &self.config.limits);
        let request = with_timeout(self.config.read_timeout, read).await?;
        if request.topics.contains(&CLOSE_TOPIC) {
            return Err(Error::violation(format!(
                "topic {CLOSE_TOPIC} is reserved and cannot be subscribed to"
            )));
        }
        Ok(request)
    }

    async fn next_frame<R>(&self, reader: &mut R) -> Result<Option<InboundFrame>>
    where
        R: AsyncBufRead + Unpin,
    {
        let read = self.config.format.read_frame(reader, &self.config.limits);
        with_timeout(self.config.read_timeout, read).await
    }

    async fn read_loop<R>(&self, reader: &mut R) -> Result<CloseReason>
    where
        R: AsyncBufRead + Unpin,
    {
        loop {
            let Some(frame) = self.next_frame(reader).await? else {
                return Ok(CloseReason::PeerClosed);
            };
            if frame.is_close() {
                return Ok(CloseReason::CloseSignal);
            }

            let topic = frame.topic;
            let size = frame.body.len();
            let delivered = self.registry.fanout(topic, frame.raw).await;
            debug!(
                "{} published {size} bytes to topic {topic}, delivered to {delivered}",
                self.peer
            );
        }
    }
}
