mod config;
mod listeners;
mod workers;

use anyhow::Result;
use shared::messaging::KafkaBroker;
use shared::observability::init_logging;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::listeners::ListenerRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    init_logging(config.logging.clone())?;
    info!("Starting Subscriber Service...");

    let broker = KafkaBroker::new(config.kafka.clone());
    let registry = ListenerRegistry::with_default_listeners()?;

    for registration in registry.registrations() {
        info!(
            listener = %registration.binding.name,
            topic = %registration.binding.topic,
            group_id = %registration.binding.group_id,
            "Listener registered"
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = workers::spawn_listeners(&broker, &registry, config.retry, shutdown_rx)?;
    info!(
        brokers = %config.kafka.bootstrap_servers(),
        listeners = handles.len(),
        "Subscriber Service running"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received, stopping listeners");

    if shutdown_tx.send(true).is_err() {
        warn!("All listeners already stopped");
    }

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Listener task failed: {}", e);
        }
    }

    info!("Subscriber Service stopped");
    Ok(())
}
