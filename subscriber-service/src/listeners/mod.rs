//! Listener registration: each (topic, group, name) tuple is bound to one handler

pub mod log_handler;

pub use log_handler::LogPayloadHandler;

use shared::messaging::{ReceivedMessage, Subscription};
use std::collections::HashSet;
use std::sync::Arc;

/// Callback invoked once per delivered message
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, message: &ReceivedMessage) -> Result<(), HandlerError>;
}

#[derive(Debug, thiserror::Error)]
#[error("handler {handler} failed: {reason}")]
pub struct HandlerError {
    pub handler: String,
    pub reason: String,
}

impl HandlerError {
    pub fn new(handler: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerBinding {
    pub name: String,
    pub topic: String,
    pub group_id: String,
}

impl ListenerBinding {
    pub fn new(name: &str, topic: &str, group_id: &str) -> Self {
        Self {
            name: name.to_string(),
            topic: topic.to_string(),
            group_id: group_id.to_string(),
        }
    }

    pub fn subscription(&self) -> Subscription {
        Subscription::new(&self.topic, &self.group_id, &self.name)
    }
}

pub struct Registration {
    pub binding: ListenerBinding,
    pub handler: Arc<dyn MessageHandler>,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("listener {0} is already registered")]
    DuplicateListener(String),

    #[error("invalid listener binding: {0}")]
    InvalidBinding(String),
}

#[derive(Default)]
pub struct ListenerRegistry {
    registrations: Vec<Registration>,
    names: HashSet<String>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The listeners the subscriber runs by default: one on topic 01, two competing on
    /// topic 02 and three competing on topic 03.
    pub fn with_default_listeners() -> Result<Self, RegistryError> {
        let mut registry = Self::new();

        let topic01 = ListenerBinding::new("myTopic01Consumer", "my-topic-01", "group-my-topic-01");
        registry.register_logger(topic01, true)?;

        for name in ["myTopic02Consumer1", "myTopic02Consumer2"] {
            let binding = ListenerBinding::new(name, "my-topic-02", "group-my-topic-02");
            registry.register_logger(binding, false)?;
        }

        for name in ["myTopic03Consumer1", "myTopic03Consumer2", "myTopic03Consumer3"] {
            let binding = ListenerBinding::new(name, "my-topic-03", "group-my-topic-03");
            registry.register_logger(binding, false)?;
        }

        Ok(registry)
    }

    pub fn register(
        &mut self,
        binding: ListenerBinding,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), RegistryError> {
        let fields = [
            ("name", &binding.name),
            ("topic", &binding.topic),
            ("group", &binding.group_id),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(RegistryError::InvalidBinding(format!(
                    "{} must not be empty",
                    field
                )));
            }
        }

        if !self.names.insert(binding.name.clone()) {
            return Err(RegistryError::DuplicateListener(binding.name));
        }

        self.registrations.push(Registration { binding, handler });
        Ok(())
    }

    fn register_logger(
        &mut self,
        binding: ListenerBinding,
        log_record: bool,
    ) -> Result<(), RegistryError> {
        let handler = Arc::new(LogPayloadHandler::new(&binding.name, log_record));
        self.register(binding, handler)
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}
