use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;
use tokio::sync::mpsc::{self, Receiver, Sender};
use uuid::Uuid;

use crate::broker::topic::SubscriberId;

/// Outcome of handing one frame to a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The writer side has gone away.
    Closed,
    /// The queue stayed full for the whole send timeout.
    TimedOut,
}

/// Represents one connection's outbound side inside the registry.
///
/// The `sender` feeds the connection's writer, which is the only thing that
/// touches the socket's write half. The channel is bounded, so `deliver`
/// waits when the peer stops draining. A subscriber that cannot keep up is
/// told to disconnect through `evict`.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub id: SubscriberId,
    sender: Sender<Bytes>,
    evicted: Arc<Notify>,
}

impl Subscriber {
    /// Create a subscriber with a fresh id and its outbound queue.
    pub fn channel(capacity: usize) -> (Self, Receiver<Bytes>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: Uuid::new_v4(),
                sender,
                evicted: Arc::new(Notify::new()),
            },
            receiver,
        )
    }

    /// Queue a raw frame for this subscriber, waiting at most `limit` for room.
    pub async fn deliver(&self, frame: Bytes, limit: Option<Duration>) -> Delivery {
        let send = self.sender.send(frame);
        let sent = match limit {
            Some(limit) => match tokio::time::timeout(limit, send).await {
                Ok(sent) => sent,
                Err(_) => return Delivery::TimedOut,
            },
            None => send.await,
        };
        match sent {
            Ok(()) => Delivery::Queued,
            Err(_) => Delivery::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Ask the owning connection to tear itself down.
    pub fn evict(&self) {
        // notify_one keeps a permit if the connection is not waiting yet
        self.evicted.notify_one();
    }

    /// Resolves once `evict` has been called on any clone of this subscriber.
    pub async fn evicted(&self) {
        self.evicted.notified().await;
    }
}
