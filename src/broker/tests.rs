use super::registry::{SharedRegistry, TopicRegistry};
use super::subscriber::{Delivery, Subscriber};
use super::topic::Topic;
use bytes::Bytes;
use std::time::Duration;
use tokio::time::timeout;
use tokio::sync::mpsc::error::TryRecvError;
use uuid::Uuid;

#[test]
fn test_topic_new() {
    let topic = Topic::new(7);
    assert_eq!(topic.id, 7);
    assert!(topic.subscribers.is_empty());
}

#[test]
fn test_topic_subscribe_and_unsubscribe() {
    let mut topic = Topic::new(7);
    let id = Uuid::new_v4();
    assert!(topic.subscribe(id));
    assert!(!topic.subscribe(id));
    assert!(topic.subscribers.contains(&id));

    assert!(topic.unsubscribe(&id));
    assert!(!topic.unsubscribe(&id));
    assert!(topic.is_empty());
}

#[test]
fn test_registry_new() {
    let registry = TopicRegistry::new();
    assert_eq!(registry.topic_count(), 0);
    assert_eq!(registry.subscriber_count(), 0);
    assert!(registry.is_consistent());
}

#[test]
fn test_subscribe_is_idempotent() {
    let mut registry = TopicRegistry::new();
    let (sub, _rx) = Subscriber::channel(4);

    assert!(registry.subscribe(5, &sub));
    assert!(!registry.subscribe(5, &sub));

    assert_eq!(registry.subscribers_of(5).len(), 1);
    assert_eq!(registry.topics_of(&sub.id), vec![5]);
    assert!(registry.is_consistent());
}

#[test]
fn test_unsubscribe_all_removes_both_directions() {
    let mut registry = TopicRegistry::new();
    let (a, _rx_a) = Subscriber::channel(4);
    let (b, _rx_b) = Subscriber::channel(4);

    registry.subscribe(1, &a);
    registry.subscribe(2, &a);
    registry.subscribe(2, &b);

    assert_eq!(registry.unsubscribe_all(&a.id), vec![1, 2]);
    assert!(registry.topics_of(&a.id).is_empty());
    assert!(!registry.is_subscribed(2, &a.id));
    assert!(registry.is_subscribed(2, &b.id));
    // topic 1 lost its last subscriber
    assert_eq!(registry.topic_count(), 1);
    assert!(registry.is_consistent());
}

#[test]
fn test_unsubscribe_all_twice_is_noop() {
    let mut registry = TopicRegistry::new();
    let (sub, _rx) = Subscriber::channel(4);
    registry.subscribe(3, &sub);

    assert_eq!(registry.unsubscribe_all(&sub.id), vec![3]);
    assert!(registry.unsubscribe_all(&sub.id).is_empty());
    assert!(registry.unsubscribe_all(&Uuid::new_v4()).is_empty());
    assert!(registry.is_consistent());
}

#[test]
fn test_invariant_holds_across_interleaved_operations() {
    let mut registry = TopicRegistry::new();
    let subs: Vec<_> = (0..6).map(|_| Subscriber::channel(1)).collect();

    for step in 0..60u32 {
        let (sub, _) = &subs[(step as usize * 7) % subs.len()];
        if step % 5 == 4 {
            registry.unsubscribe_all(&sub.id);
        } else {
            registry.subscribe(1 + step % 4, sub);
        }
        assert!(registry.is_consistent(), "inconsistent after step {step}");

        for (sub, _) in &subs {
            for topic in registry.topics_of(&sub.id) {
                assert!(registry.is_subscribed(topic, &sub.id));
            }
        }
    }
}

#[test]
fn test_recipients_of_unknown_topic_is_empty() {
    let registry = TopicRegistry::new();
    assert!(registry.recipients(42).is_empty());
}

#[tokio::test]
async fn test_fanout_reaches_only_topic_subscribers() {
    let registry = SharedRegistry::new();
    let (s1, mut rx1) = Subscriber::channel(4);
    let (s2, mut rx2) = Subscriber::channel(4);
    registry.register(&s1, &[5]);
    registry.register(&s2, &[6]);

    let frame = Bytes::from_static(b"\x05\0\0\0\x01\0\0\0x");
    assert_eq!(registry.fanout(5, frame.clone()).await, 1);

    assert_eq!(rx1.try_recv().unwrap(), frame);
    assert_eq!(rx2.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn test_fanout_to_unknown_topic_returns_zero() {
    let registry = SharedRegistry::new();
    assert_eq!(registry.fanout(99, Bytes::from_static(b"nobody")).await, 0);
}

#[tokio::test]
async fn test_fanout_skips_and_removes_closed_subscriber() {
    let registry = SharedRegistry::new();
    let (alive, mut alive_rx) = Subscriber::channel(4);
    let (dead, dead_rx) = Subscriber::channel(4);
    registry.register(&alive, &[8]);
    registry.register(&dead, &[8, 9]);

    drop(dead_rx);
    assert!(dead.is_closed());
    assert!(!alive.is_closed());

    let frame = Bytes::from_static(b"payload");
    assert_eq!(registry.fanout(8, frame.clone()).await, 1);
    assert_eq!(alive_rx.try_recv().unwrap(), frame);

    assert!(registry.topics_of(&dead.id).is_empty());
    assert_eq!(registry.subscribers_of(9).len(), 0);
    assert!(registry.is_consistent());
}

#[tokio::test]
async fn test_slow_subscriber_does_not_block_others() {
    let registry = SharedRegistry::new();
    let (slow, mut slow_rx) = Subscriber::channel(1);
    let (fast, mut fast_rx) = Subscriber::channel(8);
    registry.register(&slow, &[1]);
    registry.register(&fast, &[1]);

    // fill the slow queue so the next delivery to it has to wait
    assert_eq!(
        slow.deliver(Bytes::from_static(b"backlog"), None).await,
        Delivery::Queued
    );

    let fanout = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.fanout(1, Bytes::from_static(b"next")).await })
    };

    let got = timeout(Duration::from_secs(2), fast_rx.recv())
        .await
        .expect("fast subscriber starved")
        .expect("fast queue closed");
    assert_eq!(got, Bytes::from_static(b"next"));
    assert!(!fanout.is_finished());

    // draining the slow queue lets the fan-out complete
    assert_eq!(slow_rx.recv().await.unwrap(), Bytes::from_static(b"backlog"));
    assert_eq!(fanout.await.unwrap(), 2);
    assert_eq!(slow_rx.recv().await.unwrap(), Bytes::from_static(b"next"));
}

#[tokio::test]
async fn test_full_queue_past_send_timeout_evicts_subscriber() {
    let registry = SharedRegistry::with_send_timeout(Some(Duration::from_millis(100)));
    let (stuck, mut stuck_rx) = Subscriber::channel(1);
    let (healthy, mut healthy_rx) = Subscriber::channel(8);
    registry.register(&stuck, &[1, 2]);
    registry.register(&healthy, &[1]);

    assert_eq!(
        stuck.deliver(Bytes::from_static(b"backlog"), None).await,
        Delivery::Queued
    );

    let delivered = timeout(Duration::from_secs(2), registry.fanout(1, Bytes::from_static(b"m")))
        .await
        .expect("fan-out waited past the send timeout");
    assert_eq!(delivered, 1);
    assert_eq!(healthy_rx.try_recv().unwrap(), Bytes::from_static(b"m"));

    // removed everywhere and told to disconnect
    assert!(registry.topics_of(&stuck.id).is_empty());
    assert!(registry.subscribers_of(2).is_empty());
    assert!(registry.is_consistent());
    timeout(Duration::from_secs(1), stuck.evicted())
        .await
        .expect("stuck subscriber was not evicted");

    // later frames skip it without waiting
    assert_eq!(registry.fanout(1, Bytes::from_static(b"n")).await, 1);
    assert_eq!(stuck_rx.try_recv().unwrap(), Bytes::from_static(b"backlog"));
    assert_eq!(stuck_rx.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn test_deliver_reports_closed_and_timed_out() {
    let (sub, rx) = Subscriber::channel(1);
    let limit = Some(Duration::from_millis(20));
    assert_eq!(sub.deliver(Bytes::from_static(b"a"), limit).await, Delivery::Queued);
    assert_eq!(sub.deliver(Bytes::from_static(b"b"), limit).await, Delivery::TimedOut);
    drop(rx);
    assert_eq!(sub.deliver(Bytes::from_static(b"c"), limit).await, Delivery::Closed);
}

#[tokio::test]
async fn test_concurrent_registration_keeps_invariant() {
    let registry = SharedRegistry::new();
    let mut tasks = Vec::new();

    for n in 0..16u32 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            let (sub, _rx) = Subscriber::channel(1);
            for round in 0..20u32 {
                registry.register(&sub, &[1 + (n + round) % 5, 10]);
                assert!(registry.is_consistent());
                if round % 3 == 0 {
                    registry.unsubscribe_all(&sub.id);
                }
                tokio::task::yield_now().await;
            }
            registry.unsubscribe_all(&sub.id);
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }
    assert!(registry.is_consistent());
    assert_eq!(registry.subscriber_count(), 0);
    assert_eq!(registry.topic_count(), 0);
}
