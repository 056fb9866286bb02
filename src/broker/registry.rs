//! Topic registry
//!
//! The registry is the broker's routing table. It keeps two indexes that are
//! mutual inverses:
//! - topic id → set of subscriber ids (`Topic`)
//! - subscriber id → the subscriber handle and the topics it joined
//!
//! `s` is in `topics[t]` exactly when `t` is in `subscribers[s].topics`.
//! Both indexes live in one `TopicRegistry` value and `SharedRegistry` puts
//! that value behind a single `Mutex`, so no reader can observe one index
//! updated without the other.
//!
//! Concurrency and usage notes:
//! - `TopicRegistry` itself is synchronous and has no I/O.
//! - `SharedRegistry::fanout` snapshots the recipients under the lock and
//!   releases it before awaiting on any subscriber queue. The lock is never
//!   held across an `.await`.
//! - With a send timeout set, a subscriber whose queue stays full that long
//!   is removed and evicted, so a stalled reader delays a publisher by at
//!   most one timeout.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::broker::message::TopicId;
use crate::broker::subscriber::{Delivery, Subscriber};
use crate::broker::topic::{SubscriberId, Topic};

#[derive(Debug)]
struct Membership {
    subscriber: Subscriber,
    topics: HashSet<TopicId>,
}

#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: HashMap<TopicId, Topic>,
    subscribers: HashMap<SubscriberId, Membership>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `subscriber` to `topic` in both indexes.
    ///
    /// Idempotent: returns `false` if the pair was already registered.
    pub fn subscribe(&mut self, topic: TopicId, subscriber: &Subscriber) -> bool {
        let membership = self
            .subscribers
            .entry(subscriber.id)
            .or_insert_with(|| Membership {
                subscriber: subscriber.clone(),
                topics: HashSet::new(),
            });
        let added = membership.topics.insert(topic);

        self.topics
            .entry(topic)
            .or_insert_with(|| Topic::new(topic))
            .subscribe(subscriber.id);

        added
    }

    /// Remove the subscriber from every topic it joined.
    ///
    /// Returns the topics it was removed from (sorted); unknown subscribers
    /// yield an empty list. Topics left without subscribers are dropped.
    pub fn unsubscribe_all(&mut self, id: &SubscriberId) -> Vec<TopicId> {
        let Some(membership) = self.subscribers.remove(id) else {
            return Vec::new();
        };

        let mut removed: Vec<TopicId> = membership.topics.into_iter().collect();
        removed.sort_unstable();

        for topic_id in &removed {
            if let Some(topic) = self.topics.get_mut(topic_id) {
                topic.unsubscribe(id);
                if topic.is_empty() {
                    self.topics.remove(topic_id);
                }
            }
        }

        removed
    }

    /// Handles of everyone currently subscribed to `topic`.
    pub fn recipients(&self, topic: TopicId) -> Vec<Subscriber> {
        let Some(topic) = self.topics.get(&topic) else {
            return Vec::new();
        };
        topic
            .subscribers
            .iter()
            .filter_map(|id| self.subscribers.get(id))
            .map(|membership| membership.subscriber.clone())
            .collect()
    }

    pub fn topics_of(&self, id: &SubscriberId) -> Vec<TopicId> {
        let mut topics: Vec<TopicId> = self
            .subscribers
            .get(id)
            .map(|m| m.topics.iter().copied().collect())
            .unwrap_or_default();
        topics.sort_unstable();
        topics
    }

    pub fn subscribers_of(&self, topic: TopicId) -> HashSet<SubscriberId> {
        self.topics
            .get(&topic)
            .map(|t| t.subscribers.clone())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, topic: TopicId, id: &SubscriberId) -> bool {
        self.topics
            .get(&topic)
            .is_some_and(|t| t.subscribers.contains(id))
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Check that the two indexes are exact inverses of each other.
    pub fn is_consistent(&self) -> bool {
        let forward = self.topics.iter().all(|(topic_id, topic)| {
            topic.id == *topic_id
                && !topic.is_empty()
                && topic.subscribers.iter().all(|id| {
                    self.subscribers
                        .get(id)
                        .is_some_and(|m| m.topics.contains(topic_id))
                })
        });
        let backward = self.subscribers.iter().all(|(id, membership)| {
            membership.subscriber.id == *id
                && membership.topics.iter().all(|topic_id| {
                    self.topics
                        .get(topic_id)
                        .is_some_and(|t| t.subscribers.contains(id))
                })
        });
        forward && backward
    }
}

/// Cloneable handle to the one registry a broker shares between connections.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry {
    inner: Arc<Mutex<TopicRegistry>>,
    send_timeout: Option<Duration>,
}

impl SharedRegistry {
    /// A registry whose fan-out waits on full queues without a time limit.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_send_timeout(send_timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::default(),
            send_timeout,
        }
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        self.send_timeout
    }

    // A panic while holding the lock cannot leave the indexes half-updated:
    // every mutation finishes before returning.
    fn lock(&self) -> MutexGuard<'_, TopicRegistry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register all handshake topics for `subscriber` under one lock.
    ///
    /// Returns how many (topic, subscriber) pairs were newly added.
    pub fn register(&self, subscriber: &Subscriber, topics: &[TopicId]) -> usize {
        let mut registry = self.lock();
        let mut added = 0;
        for topic in topics {
            if registry.subscribe(*topic, subscriber) {
                added += 1;
            }
        }
        added
    }

    pub fn subscribe(&self, topic: TopicId, subscriber: &Subscriber) -> bool {
        self.lock().subscribe(topic, subscriber)
    }

    pub fn unsubscribe_all(&self, id: &SubscriberId) -> Vec<TopicId> {
        self.lock().unsubscribe_all(id)
    }

    /// Hand `frame` to every subscriber of `topic`.
    ///
    /// Deliveries to different subscribers run concurrently; a full queue only
    /// holds up this call, for at most the send timeout. A subscriber whose
    /// queue is closed is dropped from the registry; one that timed out is
    /// also evicted. Returns the number of subscribers that accepted the frame.
    pub async fn fanout(&self, topic: TopicId, frame: Bytes) -> usize {
        let recipients = self.lock().recipients(topic);
        if recipients.is_empty() {
            debug!("No subscribers for topic {topic}");
            return 0;
        }

        let results = join_all(
            recipients
                .iter()
                .map(|subscriber| subscriber.deliver(frame.clone(), self.send_timeout)),
        )
        .await;

        let mut delivered = 0;
        for (subscriber, outcome) in recipients.iter().zip(results) {
            match outcome {
                Delivery::Queued => delivered += 1,
                Delivery::Closed => {
                    warn!(
                        "Outbound queue of {} closed; removing it from the registry",
                        subscriber.id
                    );
                    self.unsubscribe_all(&subscriber.id);
                }
                Delivery::TimedOut => {
                    warn!(
                        "{} did not drain its queue within {:?}; disconnecting it",
                        subscriber.id, self.send_timeout
                    );
                    self.unsubscribe_all(&subscriber.id);
                    subscriber.evict();
                }
            }
        }
        delivered
    }

    /// Run `f` against a consistent view of the registry.
    pub fn inspect<R>(&self, f: impl FnOnce(&TopicRegistry) -> R) -> R {
        f(&self.lock())
    }

    pub fn topics_of(&self, id: &SubscriberId) -> Vec<TopicId> {
        self.lock().topics_of(id)
    }

    pub fn subscribers_of(&self, topic: TopicId) -> HashSet<SubscriberId> {
        self.lock().subscribers_of(topic)
    }

    pub fn topic_count(&self) -> usize {
        self.lock().topic_count()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscriber_count()
    }

    pub fn is_consistent(&self) -> bool {
        self.lock().is_consistent()
    }
}
