use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use shared::messaging::{DeliveryFuture, MessagePublisher, OutboundMessage};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::emitter::DeliveryMode;

/// What `submit` does when the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Wait for a free slot
    Block,
    /// Fail immediately with `PoolError::QueueFull`
    Reject,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(OverflowPolicy::Block),
            "reject" => Ok(OverflowPolicy::Reject),
            other => Err(format!("unknown overflow policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_capacity: 10_000,
            overflow: OverflowPolicy::Block,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("send queue is full")]
    QueueFull,

    #[error("send pool is closed")]
    Closed,
}

#[derive(Debug, Default)]
struct PoolStats {
    submitted: AtomicU64,
    rejected: AtomicU64,
    sent: AtomicU64,
    enqueue_failures: AtomicU64,
    delivery_failures: AtomicU64,
}

impl PoolStats {
    fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            enqueue_failures: self.enqueue_failures.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub submitted: u64,
    pub rejected: u64,
    /// Accepted by the producer (not necessarily acknowledged)
    pub sent: u64,
    pub enqueue_failures: u64,
    /// Only counted when awaiting acknowledgments
    pub delivery_failures: u64,
}

/// Fixed set of workers draining a bounded queue of messages into a publisher.
///
/// At most `queue_capacity` messages wait in the queue and at most `workers` sends run
/// at once. When acknowledgments are awaited, workers hand them to a collector task and
/// move on, so pending acks never hold up the next send.
pub struct SendPool {
    sender: mpsc::Sender<OutboundMessage>,
    workers: Vec<JoinHandle<()>>,
    collector: Option<JoinHandle<()>>,
    stats: Arc<PoolStats>,
    overflow: OverflowPolicy,
}

impl SendPool {
    pub fn new(
        config: &PoolConfig,
        publisher: Arc<dyn MessagePublisher>,
        delivery: DeliveryMode,
    ) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let stats = Arc::new(PoolStats::default());

        let (ack_sender, collector) = match delivery {
            DeliveryMode::FireAndForget => (None, None),
            DeliveryMode::AwaitAcks => {
                let (ack_sender, acks) = mpsc::channel(capacity);
                let collector = tokio::spawn(collect_acks(acks, Arc::clone(&stats)));
                (Some(ack_sender), Some(collector))
            }
        };

        let workers = (0..config.workers.max(1))
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    Arc::clone(&receiver),
                    Arc::clone(&publisher),
                    Arc::clone(&stats),
                    ack_sender.clone(),
                ))
            })
            .collect();

        debug!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            overflow = ?config.overflow,
            delivery = ?delivery,
            "Send pool started"
        );

        Self {
            sender,
            workers,
            collector,
            stats,
            overflow: config.overflow,
        }
    }

    /// Queue one message, applying the overflow policy when the queue is full
    pub async fn submit(&self, message: OutboundMessage) -> Result<(), PoolError> {
        match self.overflow {
            OverflowPolicy::Block => {
                self.sender.send(message).await.map_err(|_| PoolError::Closed)?;
            }
            OverflowPolicy::Reject => match self.sender.try_send(message) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                    return Err(PoolError::QueueFull);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return Err(PoolError::Closed),
            },
        }
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn stats(&self) -> PoolSnapshot {
        self.stats.snapshot()
    }

    /// Stop accepting submissions. Workers drain what is already queued, then exit.
    pub fn close(self) -> PoolHandle {
        drop(self.sender);
        PoolHandle {
            workers: self.workers,
            collector: self.collector,
            stats: self.stats,
        }
    }
}

/// A closed pool whose workers may still be draining
pub struct PoolHandle {
    workers: Vec<JoinHandle<()>>,
    collector: Option<JoinHandle<()>>,
    stats: Arc<PoolStats>,
}

impl PoolHandle {
    /// Wait for every worker to finish, then for every outstanding acknowledgment
    pub async fn join(self) -> PoolSnapshot {
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Send pool worker panicked");
            }
        }
        if let Some(collector) = self.collector {
            if let Err(e) = collector.await {
                warn!(error = %e, "Acknowledgment collector panicked");
            }
        }
        self.stats.snapshot()
    }

    /// Leave the workers running in the background
    pub fn detach(self) -> PoolSnapshot {
        self.stats.snapshot()
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<OutboundMessage>>>,
    publisher: Arc<dyn MessagePublisher>,
    stats: Arc<PoolStats>,
    acks: Option<mpsc::Sender<DeliveryFuture>>,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(message) = next else {
            break;
        };

        match publisher.send(message).await {
            Ok(ack) => {
                stats.sent.fetch_add(1, Ordering::Relaxed);
                if let Some(acks) = &acks {
                    if acks.send(ack).await.is_err() {
                        warn!(worker_id, "Acknowledgment collector stopped early");
                    }
                }
            }
            Err(e) => {
                stats.enqueue_failures.fetch_add(1, Ordering::Relaxed);
                warn!(worker_id, error = %e, "Failed to enqueue message");
            }
        }
    }

    debug!(worker_id, "Send pool worker drained");
}

/// Await acknowledgments concurrently until every worker has dropped its sender
async fn collect_acks(mut acks: mpsc::Receiver<DeliveryFuture>, stats: Arc<PoolStats>) {
    let mut pending = FuturesUnordered::new();
    let mut open = true;

    while open || !pending.is_empty() {
        tokio::select! {
            next = acks.recv(), if open => match next {
                Some(ack) => pending.push(ack),
                None => open = false,
            },
            Some(outcome) = pending.next(), if !pending.is_empty() => {
                if let Err(e) = outcome {
                    stats.delivery_failures.fetch_add(1, Ordering::Relaxed);
                    debug!(error = %e, "Delivery failed");
                }
            }
        }
    }

    debug!("Acknowledgments drained");
}
