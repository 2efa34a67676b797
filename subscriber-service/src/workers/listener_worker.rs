use shared::messaging::{MessageError, MessageSource, ReceivedMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::listeners::{ListenerBinding, MessageHandler};

/// Pause after a consumer error before polling again
const CONSUME_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// How often a failing handler is retried on the same record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per record, including the first
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled { attempts: u32 },
    /// Every attempt failed; the record was dropped
    Skipped { attempts: u32 },
}

/// Poll loop binding one group member to one handler
pub struct ListenerWorker {
    binding: ListenerBinding,
    handler: Arc<dyn MessageHandler>,
    retry: RetryPolicy,
}

impl ListenerWorker {
    pub fn new(
        binding: ListenerBinding,
        handler: Arc<dyn MessageHandler>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            binding,
            handler,
            retry,
        }
    }

    /// Consume until `shutdown` flips to true, the source closes or a non-transient error
    pub async fn run(
        self,
        mut source: Box<dyn MessageSource>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            listener = %self.binding.name,
            topic = %self.binding.topic,
            group_id = %self.binding.group_id,
            "Listener started"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                next = source.next_message() => match next {
                    Ok(message) => {
                        self.dispatch(&message).await;
                    }
                    Err(MessageError::Closed) => break,
                    Err(MessageError::Decode(reason)) => {
                        warn!(
                            listener = %self.binding.name,
                            %reason,
                            "Skipping undecodable message"
                        );
                    }
                    Err(e) if e.is_transient() => {
                        error!(listener = %self.binding.name, error = %e, "Failed to poll broker");
                        tokio::select! {
                            _ = shutdown.changed() => {}
                            _ = tokio::time::sleep(CONSUME_ERROR_BACKOFF) => {}
                        }
                    }
                    Err(e) => {
                        error!(
                            listener = %self.binding.name,
                            error = %e,
                            "Listener cannot continue"
                        );
                        break;
                    }
                },
            }
        }

        info!(listener = %self.binding.name, "Listener stopped");
    }

    pub async fn dispatch(&self, message: &ReceivedMessage) -> DispatchOutcome {
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.handler.handle(message).await {
                Ok(()) => return DispatchOutcome::Handled { attempts: attempt },
                Err(e) => {
                    warn!(
                        listener = %self.binding.name,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Handler failed"
                    );
                    if attempt < max_attempts && !self.retry.backoff.is_zero() {
                        tokio::time::sleep(self.retry.backoff).await;
                    }
                }
            }
        }

        error!(
            listener = %self.binding.name,
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            "Retries exhausted, skipping record"
        );
        DispatchOutcome::Skipped {
            attempts: max_attempts,
        }
    }
}
