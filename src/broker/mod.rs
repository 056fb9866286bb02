//! The broker's routing core: topic ids, messages, subscribers and the
//! shared registry that maps topics to subscribers and back.

pub mod message;
pub mod registry;
pub mod subscriber;
pub mod topic;

pub use message::{CLOSE_TOPIC, ConnectRequest, InboundFrame, Message, TopicId};
pub use registry::{SharedRegistry, TopicRegistry};
pub use subscriber::{Delivery, Subscriber};
pub use topic::SubscriberId;

#[cfg(test)]
mod tests;
