//! Embedded broker that lets tests exercise both services without a Kafka cluster.
//!
//! Topics are split into a fixed number of partitions. Unkeyed messages are spread
//! round-robin, keyed ones are hashed. Each consumer group keeps one offset per partition
//! and spreads partitions over its members by join order, recomputing the assignment
//! whenever a member joins or leaves. Offsets advance under the broker lock, so members of
//! one group never observe the same partition/offset pair twice.

use chrono::Utc;
use futures::future;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use super::{
    DeliveryFuture, DeliveryReport, MessageBroker, MessageError, MessagePublisher, MessageResult,
    MessageSource, OutboundMessage, ReceivedMessage, Subscription,
};

pub const DEFAULT_PARTITIONS: usize = 3;

#[derive(Default)]
struct TopicLog {
    partitions: Vec<Vec<ReceivedMessage>>,
    next_partition: usize,
}

#[derive(Default)]
struct GroupState {
    /// Member ids in join order
    members: Vec<String>,
    /// Next offset to hand out, per partition
    offsets: HashMap<usize, usize>,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicLog>,
    /// Keyed by (group id, topic)
    groups: HashMap<(String, String), GroupState>,
}

struct Shared {
    state: Mutex<BrokerState>,
    arrivals: Notify,
    partitions: usize,
    unavailable: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn topic_mut<'a>(&self, state: &'a mut BrokerState, topic: &str) -> &'a mut TopicLog {
        let partitions = self.partitions;
        state.topics.entry(topic.to_string()).or_insert_with(|| TopicLog {
            partitions: vec![Vec::new(); partitions],
            next_partition: 0,
        })
    }
}

/// In-process broker with topics, partitions and consumer groups
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS)
    }
}

impl InMemoryBroker {
    pub fn new(partitions: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                arrivals: Notify::new(),
                partitions: partitions.max(1),
                unavailable: AtomicBool::new(false),
            }),
        }
    }

    /// Make every subsequent send fail with a connection error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every stored message of `topic`, partition by partition
    pub fn messages(&self, topic: &str) -> Vec<ReceivedMessage> {
        let state = self.shared.lock();
        state
            .topics
            .get(topic)
            .map(|log| log.partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub fn message_count(&self, topic: &str) -> usize {
        let state = self.shared.lock();
        state
            .topics
            .get(topic)
            .map(|log| log.partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Partitions currently owned by `member` of `group_id` on `topic`
    pub fn assignment(&self, group_id: &str, topic: &str, member: &str) -> Vec<usize> {
        let state = self.shared.lock();
        state
            .groups
            .get(&(group_id.to_string(), topic.to_string()))
            .map(|group| assigned_partitions(group, member, self.shared.partitions))
            .unwrap_or_default()
    }

    pub fn group_size(&self, group_id: &str, topic: &str) -> usize {
        let state = self.shared.lock();
        state
            .groups
            .get(&(group_id.to_string(), topic.to_string()))
            .map(|group| group.members.len())
            .unwrap_or(0)
    }

    fn append(&self, message: OutboundMessage) -> MessageResult<DeliveryReport> {
        if self.shared.unavailable.load(Ordering::SeqCst) {
            return Err(MessageError::Connection("broker unavailable".to_string()));
        }

        let report = {
            let mut state = self.shared.lock();
            let partitions = self.shared.partitions;
            let log = self.shared.topic_mut(&mut state, &message.topic);

            let partition = match message.key.as_deref() {
                Some(key) => {
                    let mut hasher = DefaultHasher::new();
                    key.hash(&mut hasher);
                    (hasher.finish() % partitions as u64) as usize
                }
                None => {
                    let partition = log.next_partition;
                    log.next_partition = (log.next_partition + 1) % partitions;
                    partition
                }
            };

            let entries = &mut log.partitions[partition];
            let offset = entries.len() as i64;
            entries.push(ReceivedMessage {
                topic: message.topic,
                partition: partition as i32,
                offset,
                key: message.key,
                payload: message.payload,
                timestamp: Some(Utc::now()),
            });

            DeliveryReport {
                partition: partition as i32,
                offset,
            }
        };

        self.shared.arrivals.notify_waiters();
        Ok(report)
    }

    fn join(&self, subscription: &Subscription) -> String {
        let member_id = format!("{}-{}", subscription.member, Uuid::new_v4());
        {
            let mut state = self.shared.lock();
            self.shared.topic_mut(&mut state, &subscription.topic);
            let group = state
                .groups
                .entry((subscription.group_id.clone(), subscription.topic.clone()))
                .or_default();
            group.members.push(member_id.clone());
            debug!(
                group_id = %subscription.group_id,
                topic = %subscription.topic,
                members = group.members.len(),
                "Member joined group"
            );
        }
        self.shared.arrivals.notify_waiters();
        member_id
    }

    fn leave(&self, subscription: &Subscription, member_id: &str) {
        {
            let mut state = self.shared.lock();
            if let Some(group) = state
                .groups
                .get_mut(&(subscription.group_id.clone(), subscription.topic.clone()))
            {
                group.members.retain(|m| m != member_id);
            }
        }
        // Remaining members pick up the released partitions
        self.shared.arrivals.notify_waiters();
    }
}

fn assigned_partitions(group: &GroupState, member_id: &str, partitions: usize) -> Vec<usize> {
    match group.members.iter().position(|m| m == member_id) {
        Some(index) => (0..partitions)
            .filter(|p| p % group.members.len() == index)
            .collect(),
        None => Vec::new(),
    }
}

#[async_trait::async_trait]
impl MessagePublisher for InMemoryBroker {
    async fn send(&self, message: OutboundMessage) -> MessageResult<DeliveryFuture> {
        let report = self.append(message)?;
        Ok(Box::pin(future::ready(Ok(report))))
    }

    async fn flush(&self, _timeout: Duration) -> MessageResult<()> {
        Ok(())
    }
}

/// Group member reading from an [`InMemoryBroker`]
pub struct InMemorySource {
    broker: InMemoryBroker,
    subscription: Subscription,
    member_id: String,
    /// Rotates the starting partition so one busy partition cannot starve the others
    cursor: usize,
}

impl InMemorySource {
    fn try_take(&mut self) -> Option<ReceivedMessage> {
        let shared = &self.broker.shared;
        let mut state = shared.lock();
        let key = (
            self.subscription.group_id.clone(),
            self.subscription.topic.clone(),
        );

        let group = state.groups.get(&key)?;
        let assigned = assigned_partitions(group, &self.member_id, shared.partitions);
        if assigned.is_empty() {
            return None;
        }

        let BrokerState { topics, groups } = &mut *state;
        let log = topics.get(&self.subscription.topic)?;
        let group = groups.get_mut(&key)?;

        for step in 0..assigned.len() {
            let partition = assigned[(self.cursor + step) % assigned.len()];
            let next = group.offsets.entry(partition).or_insert(0);
            if let Some(message) = log.partitions[partition].get(*next) {
                *next += 1;
                self.cursor = (self.cursor + step + 1) % assigned.len();
                return Some(message.clone());
            }
        }
        None
    }
}

#[async_trait::async_trait]
impl MessageSource for InMemorySource {
    async fn next_message(&mut self) -> MessageResult<ReceivedMessage> {
        let shared = Arc::clone(&self.broker.shared);
        loop {
            let notified = shared.arrivals.notified();
            tokio::pin!(notified);
            // Register before checking so an append between the check and the await is not missed
            notified.as_mut().enable();

            if let Some(message) = self.try_take() {
                return Ok(message);
            }
            notified.await;
        }
    }

    fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}

impl Drop for InMemorySource {
    fn drop(&mut self) {
        self.broker.leave(&self.subscription, &self.member_id);
    }
}

impl MessageBroker for InMemoryBroker {
    fn publisher(&self) -> MessageResult<Arc<dyn MessagePublisher>> {
        Ok(Arc::new(self.clone()))
    }

    fn subscribe(&self, subscription: &Subscription) -> MessageResult<Box<dyn MessageSource>> {
        let member_id = self.join(subscription);
        Ok(Box::new(InMemorySource {
            broker: self.clone(),
            subscription: subscription.clone(),
            member_id,
            cursor: 0,
        }))
    }
}
