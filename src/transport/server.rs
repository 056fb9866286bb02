//! TCP server
//!
//! `Broker::start` binds a listener and spawns the accept loop. Every
//! accepted socket gets its own `Connection` task; all of them share one
//! `SharedRegistry`. `BrokerHandle::stop` closes the listener, signals every
//! connection through a watch channel and waits until each one has removed
//! itself from the registry.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::broker::registry::SharedRegistry;
use crate::config::{BrokerSettings, Settings};
use crate::transport::connection::{Connection, ConnectionConfig, shutdown_requested};
use crate::utils::error::{Error, Result};

pub struct Broker;

impl Broker {
    /// Bind to `addr` and start accepting connections.
    pub async fn start(addr: &str, settings: BrokerSettings) -> Result<BrokerHandle> {
        let listener = TcpListener::bind(addr).await.map_err(|source| Error::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| Error::Bind {
            addr: addr.to_string(),
            source,
        })?;

        info!("Broker listening on {local_addr} ({:?} framing)", settings.wire_format);

        let registry = SharedRegistry::with_send_timeout(settings.send_timeout());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            registry.clone(),
            settings,
            shutdown_rx,
        ));

        Ok(BrokerHandle {
            local_addr,
            registry,
            shutdown: shutdown_tx,
            accept_task,
        })
    }

    /// Start with the server address and broker settings from `settings`.
    pub async fn start_with(settings: &Settings) -> Result<BrokerHandle> {
        Self::start(&settings.server.bind_address(), settings.broker.clone()).await
    }
}

/// A running broker.
///
/// Dropping the handle without calling `stop` also shuts the broker down,
/// but nothing waits for the connections to finish.
#[derive(Debug)]
pub struct BrokerHandle {
    local_addr: SocketAddr,
    registry: SharedRegistry,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl BrokerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Stop accepting, close every connection and wait for their teardown.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.accept_task.await {
            error!("Accept loop ended abnormally: {e}");
        }
        info!("Broker on {} stopped", self.local_addr);
    }
}

fn prepare_socket(stream: &TcpStream, peer: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY for {peer}: {e}");
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: SharedRegistry,
    settings: BrokerSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let config = ConnectionConfig::from(&settings);
    let limit = settings.connection_limit();
    let mut connections = JoinSet::new();

    loop {
        while connections.try_join_next().is_some() {}

        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {e}");
                    continue;
                }
            },
            _ = shutdown_requested(&mut shutdown) => break,
        };

        if limit.is_some_and(|max| connections.len() >= max) {
            warn!("Rejecting {peer}: connection limit reached");
            drop(stream);
            continue;
        }

        debug!("New connection from {peer}");
        prepare_socket(&stream, peer);
        let connection = Connection::new(peer, registry.clone(), config.clone());
        let shutdown = shutdown.clone();
        connections.spawn(async move {
            let _ = connection.run(stream, shutdown).await;
        });
    }

    drop(listener);
    debug!("Waiting for {} connections to close", connections.len());
    while let Some(joined) = connections.join_next().await {
        if let Err(e) = joined {
            error!("Connection task failed: {e}");
        }
    }
}
