/// Messaging primitives shared by both services
pub mod in_memory;
pub mod kafka_client;

pub use in_memory::InMemoryBroker;
pub use kafka_client::{KafkaBroker, KafkaConfig, OffsetReset};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A text message about to be handed to the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub topic: String,
    pub key: Option<String>,
    pub payload: String,
}

impl OutboundMessage {
    /// Unkeyed message; the broker client picks the partition
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            payload: payload.into(),
        }
    }
}

/// A message delivered to a subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Broker acknowledgment for a single send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub partition: i32,
    pub offset: i64,
}

/// Resolves once the broker acknowledges (or rejects) a send.
///
/// Dropping it does not cancel the send.
pub type DeliveryFuture = BoxFuture<'static, MessageResult<DeliveryReport>>;

/// Binding of one listener to a topic inside a consumer group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    pub topic: String,
    pub group_id: String,
    /// Identifies the member inside its group (used as client id)
    pub member: String,
}

impl Subscription {
    pub fn new(
        topic: impl Into<String>,
        group_id: impl Into<String>,
        member: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            group_id: group_id.into(),
            member: member.into(),
        }
    }
}

/// Producer side of a broker
#[async_trait::async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Enqueue a message for delivery.
    ///
    /// Returns as soon as the client has accepted the message; the broker acknowledgment
    /// arrives through the returned future.
    async fn send(&self, message: OutboundMessage) -> MessageResult<DeliveryFuture>;

    /// Wait until every enqueued message has been acknowledged or the timeout expires
    async fn flush(&self, timeout: std::time::Duration) -> MessageResult<()>;
}

/// Consumer side of a broker, one instance per group member
#[async_trait::async_trait]
pub trait MessageSource: Send {
    /// Wait for the next message assigned to this member
    async fn next_message(&mut self) -> MessageResult<ReceivedMessage>;

    fn subscription(&self) -> &Subscription;
}

/// Entry point for creating producers and group members
pub trait MessageBroker: Send + Sync {
    fn publisher(&self) -> MessageResult<Arc<dyn MessagePublisher>>;

    /// Join `subscription.group_id` as a new member consuming `subscription.topic`
    fn subscribe(&self, subscription: &Subscription) -> MessageResult<Box<dyn MessageSource>>;
}

/// Message broker errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Producer queue full: {0}")]
    QueueFull(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Consume error: {0}")]
    Consume(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Broker closed")]
    Closed,
}

impl MessageError {
    /// Whether retrying the same operation later can succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MessageError::Connection(_) | MessageError::QueueFull(_) | MessageError::Consume(_)
        )
    }
}

pub type MessageResult<T> = Result<T, MessageError>;
