//! Shared broker plumbing and utilities for the publisher and subscriber services

// Re-export common dependencies
pub use anyhow;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tracing;

pub mod messaging;
pub mod observability;

pub use messaging::{
    DeliveryFuture, DeliveryReport, MessageBroker, MessageError, MessagePublisher,
    MessageResult, MessageSource, OutboundMessage, ReceivedMessage, Subscription,
};
