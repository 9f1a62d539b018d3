//! Shortstack statistics binary.
//!
//! Consumes shortening/resolution events into batched ClickHouse writes,
//! publishes the hot set under a leader lock on the cron schedule, and
//! serves the metrics endpoint.

use shortstack::bus::{self, EventBus, KafkaBus};
use shortstack::cache::{LeaderLock, ValkeyCache};
use shortstack::config::StatisticsConfig;
use shortstack::scheduler::Scheduler;
use shortstack::statistics::{
    self, BatchWriter, ClickHouseStore, HotSetProducer, IngestService,
};
use shortstack::telemetry::{metrics_router, Telemetry};

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shortstack statistics
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = StatisticsConfig::from_env()?;

    let telemetry = Telemetry::init(
        "statistics",
        config.tracing_collector_addr.as_deref(),
        &args.log_level,
    )?;

    info!("Starting Shortstack statistics");

    // Every dependency is checked at startup; failures here are fatal.
    let store = ClickHouseStore::new(
        &config.clickhouse_addr,
        &config.clickhouse_user,
        &config.clickhouse_password,
    );
    store.ping().await?;
    let cache = Arc::new(
        ValkeyCache::connect(&config.valkey_addr, config.valkey_password.as_deref()).await?,
    );
    let kafka: Arc<dyn EventBus> = Arc::new(KafkaBus::connect(&config.kafka_addr)?);

    let consumer = bus::create_consumer(
        &config.kafka_addr,
        bus::GROUP_STATISTICS,
        &[bus::TOPIC_SHORTENED, bus::TOPIC_UNSHORTENED],
    )?;

    let scheduler = Scheduler::new(&config.scheduler_crontab)?;

    let shutdown = CancellationToken::new();

    let (ingest, shortened_rx, resolved_rx) = IngestService::channels();
    let consumer_task = tokio::spawn(statistics::consumer::run(
        consumer,
        ingest,
        shutdown.clone(),
    ));

    let shortened_writer = BatchWriter::new(
        shortened_rx,
        Arc::new(store.clone()),
        config.clickhouse_batch_size,
        "shortened",
    );
    let resolved_writer = BatchWriter::new(
        resolved_rx,
        Arc::new(store.clone()),
        config.clickhouse_batch_size,
        "unshortened",
    );
    let shortened_writer_task = tokio::spawn(shortened_writer.run(shutdown.clone()));
    let resolved_writer_task = tokio::spawn(resolved_writer.run(shutdown.clone()));

    let (ticks, scheduler_task) = scheduler.start(shutdown.clone());
    let producer = HotSetProducer::new(
        Arc::new(store),
        cache as Arc<dyn LeaderLock>,
        kafka,
        config.top_amount,
        config.top_ttl,
        config.lock_ttl,
    );
    let producer_task = tokio::spawn(producer.run(ticks, shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    info!(addr = %config.server_addr, "Serving metrics");
    let registry = telemetry.registry();
    let http_shutdown = shutdown.clone();
    let http_task = tokio::spawn(async move {
        axum::serve(listener, metrics_router(registry))
            .with_graceful_shutdown(http_shutdown.cancelled_owned())
            .await
    });

    shutdown_signal().await;
    info!("Shutting down");
    shutdown.cancel();

    let _ = tokio::time::timeout(Duration::from_secs(10), async {
        let _ = consumer_task.await;
        let _ = shortened_writer_task.await;
        let _ = resolved_writer_task.await;
        let _ = producer_task.await;
        let _ = scheduler_task.await;
        let _ = http_task.await;
    })
    .await;

    info!("Stopped gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
