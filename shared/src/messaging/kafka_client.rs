//! Kafka implementation of the messaging traits on top of `rdkafka`
//!
//! Producer sends are enqueued on librdkafka's local queue and return immediately with a
//! delivery future; batching, retries and partitioning stay inside librdkafka. Every
//! subscriber member owns its own `StreamConsumer`, so group coordination and offset
//! commits are left to the broker.

use chrono::{TimeZone, Utc};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{
    DeliveryFuture, DeliveryReport, MessageBroker, MessageError, MessagePublisher, MessageResult,
    MessageSource, OutboundMessage, ReceivedMessage, Subscription,
};

/// Pause between enqueue attempts while librdkafka's local queue is full
const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(50);

/// Where a group without committed offsets starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetReset {
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

impl fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OffsetReset {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" | "smallest" => Ok(OffsetReset::Earliest),
            "latest" | "largest" => Ok(OffsetReset::Latest),
            other => Err(MessageError::Configuration(format!(
                "unknown auto offset reset '{}'",
                other
            ))),
        }
    }
}

/// Kafka client configuration
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub client_id: String,
    pub message_timeout_ms: u64,
    /// How long a send may wait for room in the local producer queue
    pub queue_timeout_ms: u64,
    pub session_timeout_ms: u64,
    pub auto_offset_reset: OffsetReset,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            client_id: "kafka-practice".to_string(),
            message_timeout_ms: 30_000,
            queue_timeout_ms: 60_000,
            session_timeout_ms: 45_000,
            auto_offset_reset: OffsetReset::Latest,
        }
    }
}

impl KafkaConfig {
    /// Read `KAFKA_*` settings through `var`, falling back to defaults
    pub fn from_vars<F>(var: F, default_client_id: &str) -> MessageResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let brokers = match var("KAFKA_BROKERS") {
            Some(raw) => parse_brokers(&raw)?,
            None => defaults.brokers,
        };

        Ok(Self {
            brokers,
            client_id: var("KAFKA_CLIENT_ID").unwrap_or_else(|| default_client_id.to_string()),
            message_timeout_ms: parse_var(
                &var,
                "KAFKA_MESSAGE_TIMEOUT_MS",
                defaults.message_timeout_ms,
            )?,
            queue_timeout_ms: parse_var(&var, "KAFKA_QUEUE_TIMEOUT_MS", defaults.queue_timeout_ms)?,
            session_timeout_ms: parse_var(
                &var,
                "KAFKA_SESSION_TIMEOUT_MS",
                defaults.session_timeout_ms,
            )?,
            auto_offset_reset: match var("KAFKA_AUTO_OFFSET_RESET") {
                Some(raw) => raw.parse()?,
                None => defaults.auto_offset_reset,
            },
        })
    }

    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    pub fn producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.bootstrap_servers())
            .set("client.id", &self.client_id)
            .set("message.timeout.ms", self.message_timeout_ms.to_string());
        config
    }

    pub fn consumer_config(&self, subscription: &Subscription) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.bootstrap_servers())
            .set("client.id", format!("{}-{}", self.client_id, subscription.member))
            .set("group.id", &subscription.group_id)
            .set("enable.auto.commit", "true")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .set("auto.offset.reset", self.auto_offset_reset.as_str());
        config
    }
}

fn parse_brokers(raw: &str) -> MessageResult<Vec<String>> {
    let brokers: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect();

    if brokers.is_empty() {
        return Err(MessageError::Configuration(
            "KAFKA_BROKERS must list at least one broker".to_string(),
        ));
    }
    Ok(brokers)
}

fn parse_var<F>(var: &F, key: &str, default: u64) -> MessageResult<u64>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            MessageError::Configuration(format!("{} must be a number, got '{}'", key, raw))
        }),
        None => Ok(default),
    }
}

/// Kafka producer
#[derive(Clone)]
pub struct KafkaPublisher {
    producer: FutureProducer,
    queue_timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(config: &KafkaConfig) -> MessageResult<Self> {
        let producer: FutureProducer = config
            .producer_config()
            .create()
            .map_err(|e| MessageError::Configuration(format!("failed to create producer: {}", e)))?;

        info!(
            brokers = %config.bootstrap_servers(),
            client_id = %config.client_id,
            "Kafka producer created"
        );

        Ok(Self {
            producer,
            queue_timeout: Duration::from_millis(config.queue_timeout_ms),
        })
    }
}

#[async_trait::async_trait]
impl MessagePublisher for KafkaPublisher {
    async fn send(&self, message: OutboundMessage) -> MessageResult<DeliveryFuture> {
        let deadline = Instant::now() + self.queue_timeout;

        loop {
            let mut record =
                FutureRecord::<str, str>::to(&message.topic).payload(message.payload.as_str());
            if let Some(key) = message.key.as_deref() {
                record = record.key(key);
            }

            let outcome = self.producer.send_result(record).map_err(|(e, _)| e);
            match outcome {
                Ok(delivery) => {
                    return Ok(Box::pin(async move {
                        match delivery.await {
                            Ok(Ok((partition, offset))) => Ok(DeliveryReport { partition, offset }),
                            Ok(Err((e, _))) => Err(MessageError::Delivery(e.to_string())),
                            Err(_) => Err(MessageError::Delivery(
                                "producer dropped before delivery".to_string(),
                            )),
                        }
                    }));
                }
                Err(KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull)) => {
                    if Instant::now() >= deadline {
                        return Err(MessageError::QueueFull(format!(
                            "no room in producer queue after {:?}",
                            self.queue_timeout
                        )));
                    }
                    debug!(topic = %message.topic, "Producer queue full, waiting");
                    tokio::time::sleep(QUEUE_FULL_BACKOFF).await;
                }
                Err(e) => return Err(MessageError::Publish(e.to_string())),
            }
        }
    }

    async fn flush(&self, timeout: Duration) -> MessageResult<()> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| MessageError::Delivery(format!("flush task failed: {}", e)))?
            .map_err(|e| MessageError::Delivery(e.to_string()))
    }
}

/// One consumer group member
pub struct KafkaSource {
    consumer: StreamConsumer,
    subscription: Subscription,
}

impl KafkaSource {
    pub fn new(config: &KafkaConfig, subscription: &Subscription) -> MessageResult<Self> {
        let consumer: StreamConsumer = config
            .consumer_config(subscription)
            .create()
            .map_err(|e| MessageError::Configuration(format!("failed to create consumer: {}", e)))?;

        consumer
            .subscribe(&[subscription.topic.as_str()])
            .map_err(|e| MessageError::Connection(format!("failed to subscribe: {}", e)))?;

        info!(
            topic = %subscription.topic,
            group_id = %subscription.group_id,
            member = %subscription.member,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            subscription: subscription.clone(),
        })
    }
}

#[async_trait::async_trait]
impl MessageSource for KafkaSource {
    async fn next_message(&mut self) -> MessageResult<ReceivedMessage> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| MessageError::Consume(e.to_string()))?;

        let payload = match message.payload_view::<str>() {
            None => String::new(),
            Some(Ok(payload)) => payload.to_owned(),
            Some(Err(e)) => {
                return Err(MessageError::Decode(format!(
                    "payload at {}/{}@{} is not UTF-8: {}",
                    message.topic(),
                    message.partition(),
                    message.offset(),
                    e
                )))
            }
        };

        let key = match message.key_view::<str>() {
            None => None,
            Some(Ok(key)) => Some(key.to_owned()),
            Some(Err(_)) => {
                warn!(
                    topic = %message.topic(),
                    offset = message.offset(),
                    "Ignoring non UTF-8 key"
                );
                None
            }
        };

        Ok(ReceivedMessage {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key,
            payload,
            timestamp: message
                .timestamp()
                .to_millis()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        })
    }

    fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}

/// Kafka-backed broker
#[derive(Debug, Clone)]
pub struct KafkaBroker {
    config: KafkaConfig,
}

impl KafkaBroker {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }
}

impl MessageBroker for KafkaBroker {
    fn publisher(&self) -> MessageResult<Arc<dyn MessagePublisher>> {
        Ok(Arc::new(KafkaPublisher::new(&self.config)?))
    }

    fn subscribe(&self, subscription: &Subscription) -> MessageResult<Box<dyn MessageSource>> {
        Ok(Box::new(KafkaSource::new(&self.config, subscription)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = KafkaConfig::from_vars(vars(&[]), "publisher-service").unwrap();
        assert_eq!(config.brokers, vec!["localhost:9092".to_string()]);
        assert_eq!(config.client_id, "publisher-service");
        assert_eq!(config.auto_offset_reset, OffsetReset::Latest);
        assert_eq!(config.queue_timeout_ms, 60_000);
    }

    #[test]
    fn test_brokers_are_split_and_trimmed() {
        let config = KafkaConfig::from_vars(
            vars(&[("KAFKA_BROKERS", "kafka-1:9092, kafka-2:9092,,")]),
            "subscriber-service",
        )
        .unwrap();
        assert_eq!(config.bootstrap_servers(), "kafka-1:9092,kafka-2:9092");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(KafkaConfig::from_vars(vars(&[("KAFKA_BROKERS", " , ")]), "x").is_err());
        let timeout = vars(&[("KAFKA_MESSAGE_TIMEOUT_MS", "soon")]);
        assert!(KafkaConfig::from_vars(timeout, "x").is_err());
        let reset = vars(&[("KAFKA_AUTO_OFFSET_RESET", "middle")]);
        assert!(KafkaConfig::from_vars(reset, "x").is_err());
    }

    #[test]
    fn test_consumer_config_binds_group() {
        let config = KafkaConfig::from_vars(
            vars(&[("KAFKA_AUTO_OFFSET_RESET", "earliest")]),
            "subscriber-service",
        )
        .unwrap();
        let subscription =
            Subscription::new("my-topic-02", "group-my-topic-02", "myTopic02Consumer1");
        let client = config.consumer_config(&subscription);

        assert_eq!(client.get("group.id"), Some("group-my-topic-02"));
        assert_eq!(client.get("client.id"), Some("subscriber-service-myTopic02Consumer1"));
        assert_eq!(client.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(client.get("enable.auto.commit"), Some("true"));
    }

    #[test]
    fn test_producer_config() {
        let config = KafkaConfig::default();
        let client = config.producer_config();
        assert_eq!(client.get("bootstrap.servers"), Some("localhost:9092"));
        assert_eq!(client.get("message.timeout.ms"), Some("30000"));
        assert!(client.get("group.id").is_none());
    }

    #[tokio::test]
    async fn test_producer_creation_does_not_need_a_live_broker() {
        let config = KafkaConfig {
            brokers: vec!["127.0.0.1:1".to_string()],
            ..Default::default()
        };
        assert!(KafkaBroker::new(config).publisher().is_ok());
    }
}
