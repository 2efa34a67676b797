pub mod listener_worker;

pub use listener_worker::{ListenerWorker, RetryPolicy};

use shared::messaging::{MessageBroker, MessageResult};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::listeners::ListenerRegistry;

/// Subscribe every registered listener and start one task per listener.
///
/// All subscriptions are made before any task starts, so a failure leaves nothing running.
pub fn spawn_listeners(
    broker: &dyn MessageBroker,
    registry: &ListenerRegistry,
    retry: RetryPolicy,
    shutdown: watch::Receiver<bool>,
) -> MessageResult<Vec<JoinHandle<()>>> {
    let mut sources = Vec::with_capacity(registry.len());
    for registration in registry.registrations() {
        sources.push(broker.subscribe(&registration.binding.subscription())?);
    }

    let handles = registry
        .registrations()
        .iter()
        .zip(sources)
        .map(|(registration, source)| {
            let worker = ListenerWorker::new(
                registration.binding.clone(),
                registration.handler.clone(),
                retry,
            );
            tokio::spawn(worker.run(source, shutdown.clone()))
        })
        .collect::<Vec<_>>();

    info!(listeners = handles.len(), "Listeners spawned");
    Ok(handles)
}
