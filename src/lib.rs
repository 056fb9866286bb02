//! # tcpsub
//!
//! `tcpsub` is a small in-memory publish/subscribe broker that speaks a
//! length-prefixed binary protocol over plain TCP.
//!
//! A client connects, sends the list of topic ids it wants to receive, and
//! then publishes `(topic, body)` frames. The broker relays every frame, byte
//! for byte, to each connection currently subscribed to that topic. Topic `0`
//! is reserved as the close signal.
//!
//! ## Core Modules
//!
//! - `broker`: topic ids, messages and the shared topic registry.
//! - `transport`: wire codecs, the per-connection handler and the TCP server.
//! - `client`: `PubSubClient`, a helper for publishing and subscribing.
//! - `config`: layered configuration (file + environment).
//! - `utils`: the crate error type and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod transport;
pub mod utils;

pub use broker::{CLOSE_TOPIC, Message, TopicId};
pub use client::PubSubClient;
pub use transport::{Broker, BrokerHandle, WireFormat};
pub use utils::error::{Error, Result};
