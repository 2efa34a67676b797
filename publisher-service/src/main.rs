mod config;
mod emitter;
mod error;
mod handlers;
mod routes;
mod targets;
mod workers;

use anyhow::Result;
use shared::messaging::{KafkaBroker, MessageBroker, MessagePublisher};
use shared::observability::init_logging;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::Config;

/// Upper bound for draining the producer queue on shutdown
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    init_logging(config.logging.clone())?;
    info!("Starting Publisher Service...");

    let broker = KafkaBroker::new(config.kafka.clone());
    let publisher = broker.publisher()?;
    info!(brokers = %config.kafka.bootstrap_servers(), "Kafka producer ready");

    for target in &config.publish.targets {
        info!(
            route = %format!("/publish/{}", target.route),
            topic = %target.topic,
            count = target.count,
            mode = ?target.mode,
            "Publish target registered"
        );
    }

    let app_state = Arc::new(AppState {
        config: config.clone(),
        publisher: publisher.clone(),
        started_at: Instant::now(),
    });

    let app = routes::create_router(app_state);

    // Start server
    let addr = config.bind_address();
    info!("Publisher Service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Flushing producer before exit");
    if let Err(e) = publisher.flush(SHUTDOWN_FLUSH_TIMEOUT).await {
        warn!("Producer flush incomplete: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

pub struct AppState {
    pub config: Config,
    pub publisher: Arc<dyn MessagePublisher>,
    pub started_at: Instant,
}
