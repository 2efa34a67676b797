use shared::messaging::ReceivedMessage;
use tracing::info;

use super::{HandlerError, MessageHandler};

/// Logs every payload it is handed, unmodified
pub struct LogPayloadHandler {
    name: String,
    /// Also log topic, partition, offset and key
    log_record: bool,
}

impl LogPayloadHandler {
    pub fn new(name: &str, log_record: bool) -> Self {
        Self {
            name: name.to_string(),
            log_record,
        }
    }
}

#[async_trait::async_trait]
impl MessageHandler for LogPayloadHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, message: &ReceivedMessage) -> Result<(), HandlerError> {
        info!("{}...", self.name);
        if self.log_record {
            info!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                key = ?message.key,
                timestamp = ?message.timestamp,
                "record"
            );
        }
        info!("{}", message.payload);
        Ok(())
    }
}
