//! The `client` module provides `PubSubClient`, the programmatic way to talk
//! to a broker: connect with a topic list, publish, receive and close.

pub mod pubsub_client;
pub use pubsub_client::PubSubClient;

#[cfg(test)]
mod tests;
