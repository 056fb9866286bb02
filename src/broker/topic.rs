//! Topic management
//!
//! A `Topic` holds the set of subscriber IDs for one topic id. Duplicate
//! subscriptions are a no-op.
//!
//! Concurrency note: callers must synchronize access to `Topic` (the registry
//! keeps every topic behind its single lock).

use std::collections::HashSet;

use uuid::Uuid;

use crate::broker::message::TopicId;

/// Identifies one connection inside the broker. Never sent on the wire.
pub type SubscriberId = Uuid;

#[derive(Debug, Default)]
pub struct Topic {
    pub id: TopicId,
    pub subscribers: HashSet<SubscriberId>,
}

impl Topic {
    pub fn new(id: TopicId) -> Self {
        Self {
            id,
            subscribers: HashSet::new(),
        }
    }

    /// Add a subscriber to the topic. Returns `false` if it was already there.
    pub fn subscribe(&mut self, id: SubscriberId) -> bool {
        self.subscribers.insert(id)
    }

    pub fn unsubscribe(&mut self, id: &SubscriberId) -> bool {
        self.subscribers.remove(id)
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
