//! Relay delivery worker.
//!
//! Runs the full webhook delivery pipeline: bus consumer → dispatcher →
//! bounded delivery attempts, plus the retry worker that resumes due
//! deliveries. Shuts down gracefully on ctrl-c: the consumer and retry
//! loops stop scheduling new work, while attempts already in flight run to
//! completion (bounded by the per-attempt timeout).

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_events::{
    BusBackend, BusConfig, DeliveryConfig, DeliverySender, Dispatcher, EventBus, MemoryBus,
    RedisStreamBus, RetryConfig, RetryWorker,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_worker=debug,relay_events=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let bus_config = BusConfig::from_env()?;
    let retry_config = RetryConfig::from_env();
    let delivery_config = DeliveryConfig::from_env();

    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = relay_db::connect(&database_url).await?;
    relay_db::MIGRATOR.run(&pool).await?;
    relay_db::health_check(&pool).await?;
    tracing::info!("Database ready");

    let cancel = CancellationToken::new();
    let sender = Arc::new(DeliverySender::new());
    let limiter = Arc::new(Semaphore::new(delivery_config.max_in_flight));
    let dispatcher = Arc::new(Dispatcher::new(pool.clone(), sender.clone(), limiter.clone()));

    let bus: Arc<dyn EventBus> = match bus_config.backend {
        BusBackend::Redis => {
            Arc::new(RedisStreamBus::connect(&bus_config, cancel.clone()).await?)
        }
        BusBackend::Memory => {
            tracing::warn!("In-process bus selected: events do not survive restarts");
            Arc::new(MemoryBus::with_default_capacity(cancel.clone()))
        }
    };
    bus.subscribe(dispatcher).await?;
    tracing::info!(backend = ?bus_config.backend, "Bus consumer running");

    let retry_worker = RetryWorker::new(pool, sender, limiter, retry_config);
    let retry_cancel = cancel.clone();
    let retry_handle = tokio::spawn(async move {
        retry_worker.run(retry_cancel).await;
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    cancel.cancel();
    retry_handle.await?;
    tracing::info!("Worker stopped");

    Ok(())
}
