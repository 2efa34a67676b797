//! Bulk emission of numbered messages for one publish target

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use shared::messaging::{DeliveryFuture, MessagePublisher, OutboundMessage};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::targets::PublishTarget;
use crate::workers::{PoolConfig, SendPool};

/// Whether a publish request waits for broker acknowledgments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Hand messages to the producer and move on
    FireAndForget,
    /// Wait for every acknowledgment before answering
    AwaitAcks,
}

/// Outcome of one publish request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitReport {
    pub topic: String,
    pub requested: u64,
    /// Messages accepted by the producer, or by the pool queue in pooled mode
    pub submitted: u64,
    pub enqueue_failures: u64,
    pub rejected: u64,
    pub delivery_failures: u64,
    pub elapsed_ms: u64,
}

impl EmitReport {
    fn new(target: &PublishTarget) -> Self {
        Self {
            topic: target.topic.clone(),
            requested: target.count,
            ..Default::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.enqueue_failures == 0 && self.rejected == 0 && self.delivery_failures == 0
    }
}

/// Send `target.count` messages from the calling task, index 0 first
pub async fn emit_sequential(
    publisher: &dyn MessagePublisher,
    target: &PublishTarget,
    delivery: DeliveryMode,
) -> EmitReport {
    let started = Instant::now();
    let mut report = EmitReport::new(target);
    let mut pending: Vec<DeliveryFuture> = Vec::new();

    info!(topic = %target.topic, count = target.count, "Emitting messages");

    for index in 0..target.count {
        let message = OutboundMessage::new(&target.topic, target.payload(index));
        match publisher.send(message).await {
            Ok(ack) => {
                report.submitted += 1;
                if delivery == DeliveryMode::AwaitAcks {
                    pending.push(ack);
                }
            }
            Err(e) => {
                report.enqueue_failures += 1;
                warn!(topic = %target.topic, index, error = %e, "Failed to enqueue message");
            }
        }
    }

    report.delivery_failures = join_all(pending)
        .await
        .iter()
        .filter(|outcome| outcome.is_err())
        .count() as u64;

    report.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(report = ?report, "Emission finished");
    report
}

/// Send `target.count` messages through a per-request [`SendPool`].
///
/// The pool is closed once every index has been submitted. In fire-and-forget mode its
/// workers keep draining after this returns.
pub async fn emit_pooled(
    publisher: Arc<dyn MessagePublisher>,
    target: &PublishTarget,
    pool_config: &PoolConfig,
    delivery: DeliveryMode,
) -> EmitReport {
    let started = Instant::now();
    let mut report = EmitReport::new(target);
    let pool = SendPool::new(pool_config, publisher, delivery);

    info!(
        topic = %target.topic,
        count = target.count,
        workers = pool_config.workers,
        "Emitting messages through send pool"
    );

    for index in 0..target.count {
        let message = OutboundMessage::new(&target.topic, target.payload(index));
        if let Err(e) = pool.submit(message).await {
            warn!(topic = %target.topic, index, error = %e, "Send pool refused message");
        }
    }

    debug!(queued = ?pool.stats(), "Every index handed to the send pool");
    let handle = pool.close();
    let stats = match delivery {
        DeliveryMode::FireAndForget => handle.detach(),
        DeliveryMode::AwaitAcks => handle.join().await,
    };

    report.submitted = stats.submitted;
    report.rejected = stats.rejected;
    report.enqueue_failures = stats.enqueue_failures;
    report.delivery_failures = stats.delivery_failures;
    report.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(report = ?report, "Submission finished");
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets::EmitMode;
    use crate::workers::OverflowPolicy;
    use pretty_assertions::assert_eq;
    use shared::messaging::{InMemoryBroker, MessageError, MessageResult};
    use std::collections::HashSet;
    use std::time::Duration;

    fn sequential(count: u64) -> PublishTarget {
        PublishTarget::new("topic1", "publish1", "my-topic-01", count, EmitMode::Sequential)
    }

    fn pooled(count: u64) -> PublishTarget {
        PublishTarget::new("topic3", "publish3", "my-topic-03", count, EmitMode::Pooled)
    }

    fn payloads(broker: &InMemoryBroker, topic: &str) -> Vec<String> {
        broker.messages(topic).into_iter().map(|m| m.payload).collect()
    }

    #[tokio::test]
    async fn test_sequential_emits_every_index_in_order() {
        let broker = InMemoryBroker::new(1);
        let report = emit_sequential(&broker, &sequential(250), DeliveryMode::FireAndForget).await;

        let expected: Vec<String> = (0..250).map(|i| format!("publish1-message-{}", i)).collect();

        assert_eq!(payloads(&broker, "my-topic-01"), expected);
        assert_eq!(report.submitted, 250);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_sequential_only_touches_its_topic() {
        let broker = InMemoryBroker::default();
        emit_sequential(&broker, &sequential(10), DeliveryMode::AwaitAcks).await;

        assert_eq!(broker.message_count("my-topic-01"), 10);
        assert_eq!(broker.message_count("my-topic-02"), 0);
    }

    #[tokio::test]
    async fn test_sequential_continues_past_failures() {
        let broker = InMemoryBroker::default();
        broker.set_unavailable(true);
        let report = emit_sequential(&broker, &sequential(20), DeliveryMode::FireAndForget).await;

        assert_eq!(report.requested, 20);
        assert_eq!(report.enqueue_failures, 20);
        assert_eq!(report.submitted, 0);
    }

    #[tokio::test]
    async fn test_pooled_emits_each_payload_exactly_once() {
        let broker = InMemoryBroker::default();
        let pool_config = PoolConfig {
            workers: 10,
            queue_capacity: 16,
            overflow: OverflowPolicy::Block,
        };
        let publisher = Arc::new(broker.clone());

        let report =
            emit_pooled(publisher, &pooled(1_000), &pool_config, DeliveryMode::AwaitAcks).await;

        let sent = payloads(&broker, "my-topic-03");
        let distinct: HashSet<&String> = sent.iter().collect();
        let expected: HashSet<String> =
            (0..1_000).map(|i| format!("publish3-message-{}", i)).collect();

        assert_eq!(sent.len(), 1_000);
        assert_eq!(distinct.len(), 1_000);
        assert!(sent.iter().all(|p| expected.contains(p)));
        assert_eq!(report.submitted, 1_000);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_pooled_fire_and_forget_returns_before_draining() {
        let broker = InMemoryBroker::default();
        let pool_config = PoolConfig {
            workers: 2,
            queue_capacity: 1_000,
            overflow: OverflowPolicy::Block,
        };
        let publisher = Arc::new(broker.clone());

        let report =
            emit_pooled(publisher, &pooled(500), &pool_config, DeliveryMode::FireAndForget).await;
        assert_eq!(report.submitted, 500);

        // Detached workers still finish the job
        tokio::time::timeout(Duration::from_secs(5), async {
            while broker.message_count("my-topic-03") < 500 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("detached workers never drained the queue");
    }

    #[tokio::test]
    async fn test_await_acks_counts_delivery_failures() {
        struct NackPublisher;

        #[async_trait::async_trait]
        impl MessagePublisher for NackPublisher {
            async fn send(&self, _message: OutboundMessage) -> MessageResult<DeliveryFuture> {
                let nack = Err(MessageError::Delivery("nack".to_string()));
                Ok(Box::pin(futures::future::ready(nack)))
            }

            async fn flush(&self, _timeout: Duration) -> MessageResult<()> {
                Ok(())
            }
        }

        let report = emit_sequential(&NackPublisher, &sequential(3), DeliveryMode::AwaitAcks).await;
        assert_eq!(report.submitted, 3);
        assert_eq!(report.delivery_failures, 3);

        let report =
            emit_sequential(&NackPublisher, &sequential(3), DeliveryMode::FireAndForget).await;
        assert_eq!(report.delivery_failures, 0);
    }
}
