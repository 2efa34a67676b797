use serde::{Deserialize, Serialize};

/// How a target's messages are handed to the producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmitMode {
    /// The request task sends every message itself, in index order
    Sequential,
    /// Sends are spread over a per-request worker pool
    Pooled,
}

/// One `/publish/{route}` endpoint and the load it generates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishTarget {
    pub route: String,
    /// Payload prefix
    pub label: String,
    pub topic: String,
    pub count: u64,
    pub mode: EmitMode,
}

impl PublishTarget {
    pub fn new(route: &str, label: &str, topic: &str, count: u64, mode: EmitMode) -> Self {
        Self {
            route: route.to_string(),
            label: label.to_string(),
            topic: topic.to_string(),
            count,
            mode,
        }
    }

    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("topic1", "publish1", "my-topic-01", 10_000, EmitMode::Sequential),
            Self::new("topic2", "publish2", "my-topic-02", 100_000, EmitMode::Sequential),
            Self::new("topic3", "publish3", "my-topic-03", 10_000_000, EmitMode::Pooled),
        ]
    }

    pub fn payload(&self, index: u64) -> String {
        payload_for(&self.label, index)
    }
}

/// `"<label>-message-<index>"`
pub fn payload_for(label: &str, index: u64) -> String {
    format!("{}-message-{}", label, index)
}
