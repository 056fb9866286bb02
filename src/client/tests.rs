use super::PubSubClient;
use crate::broker::message::Message;
use crate::config::BrokerSettings;
use crate::transport::{Broker, BrokerHandle, WireFormat};
use crate::utils::error::Error;
use futures::StreamExt;
use std::pin::pin;
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn start_broker(format: WireFormat) -> BrokerHandle {
    let settings = BrokerSettings {
        wire_format: format,
        ..BrokerSettings::default()
    };
    Broker::start("127.0.0.1:0", settings)
        .await
        .expect("start broker")
}

async fn wait_for_subscribers(broker: &BrokerHandle, count: usize) {
    let registry = broker.registry().clone();
    timeout(WAIT, async move {
        while registry.subscriber_count() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscribers never registered");
}

#[tokio::test]
async fn test_publish_and_receive() {
    let broker = start_broker(WireFormat::Binary).await;
    let mut sub = PubSubClient::connect(broker.local_addr(), &[5]).await.unwrap();
    let mut publisher = PubSubClient::connect(broker.local_addr(), &[]).await.unwrap();
    wait_for_subscribers(&broker, 1).await;

    publisher.publish(5, "hello").await.unwrap();
    publisher.publish(5, b"").await.unwrap();

    let first = timeout(WAIT, sub.receive()).await.unwrap().unwrap();
    assert_eq!(first, Some(Message::new(5, "hello")));
    let second = timeout(WAIT, sub.receive()).await.unwrap().unwrap();
    assert_eq!(second, Some(Message::new(5, "")));

    publisher.close().await.unwrap();
    sub.close().await.unwrap();
    broker.stop().await;
}

#[tokio::test]
async fn test_operations_after_close_fail() {
    let broker = start_broker(WireFormat::Binary).await;
    let mut client = PubSubClient::connect(broker.local_addr(), &[1]).await.unwrap();
    assert!(client.is_connected());

    client.close().await.unwrap();
    assert!(!client.is_connected());
    assert!(matches!(
        client.publish(1, "late").await,
        Err(Error::NotConnected)
    ));
    assert!(matches!(client.receive().await, Err(Error::NotConnected)));
    assert!(matches!(client.close().await, Err(Error::NotConnected)));

    broker.stop().await;
}

#[tokio::test]
async fn test_reserved_topic_is_rejected_locally() {
    let broker = start_broker(WireFormat::Binary).await;
    assert!(matches!(
        PubSubClient::connect(broker.local_addr(), &[3, 0]).await,
        Err(Error::ProtocolViolation(_))
    ));

    let mut client = PubSubClient::connect(broker.local_addr(), &[]).await.unwrap();
    assert!(matches!(
        client.publish(0, "x").await,
        Err(Error::ProtocolViolation(_))
    ));
    assert!(client.is_connected());

    broker.stop().await;
}

#[tokio::test]
async fn test_message_stream_ends_when_broker_stops() {
    let broker = start_broker(WireFormat::Binary).await;
    let addr = broker.local_addr();
    let mut sub = PubSubClient::connect(addr, &[2]).await.unwrap();
    let mut publisher = PubSubClient::connect(addr, &[]).await.unwrap();
    wait_for_subscribers(&broker, 1).await;

    for body in ["a", "b", "c"] {
        publisher.publish(2, body).await.unwrap();
    }

    {
        let messages = sub.messages().take(2);
        let received: Vec<_> = timeout(WAIT, messages.collect()).await.unwrap();
        let bodies: Vec<_> = received
            .into_iter()
            .map(|m| m.unwrap().body)
            .collect();
        assert_eq!(bodies, vec!["a", "b"]);
    }

    // a fresh stream continues where the previous one stopped
    {
        let mut messages = pin!(sub.messages());
        let third = timeout(WAIT, messages.next()).await.unwrap();
        assert_eq!(third.unwrap().unwrap(), Message::new(2, "c"));
    }

    broker.stop().await;
    let rest: Vec<_> = timeout(WAIT, sub.messages().collect()).await.unwrap();
    assert!(rest.is_empty());
    assert!(matches!(sub.receive().await, Err(Error::NotConnected)));
}

#[tokio::test]
async fn test_text_client_round_trip() {
    let broker = start_broker(WireFormat::Text).await;
    let addr = broker.local_addr();
    let mut sub = PubSubClient::connect_with(addr, &[8], WireFormat::Text)
        .await
        .unwrap();
    let mut publisher = PubSubClient::connect_with(addr, &[], WireFormat::Text)
        .await
        .unwrap();
    wait_for_subscribers(&broker, 1).await;

    publisher.publish(8, "red,wine").await.unwrap();
    assert!(matches!(
        publisher.publish(8, "two\nlines").await,
        Err(Error::ProtocolViolation(_))
    ));

    let got = timeout(WAIT, sub.receive()).await.unwrap().unwrap();
    assert_eq!(got, Some(Message::new(8, "red,wine")));

    broker.stop().await;
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    assert!(matches!(
        PubSubClient::connect(addr, &[1]).await,
        Err(Error::ConnectionReset(_))
    ));
}
