//! Shortstack shortener binary.
//!
//! Serves the URL-shortening gRPC contract and consumes the hot-set topic
//! into the resolution cache.

use shortstack::bus::{self, EventPublisher, KafkaBus};
use shortstack::cache::{UrlCache, ValkeyCache};
use shortstack::config::ShortenerConfig;
use shortstack::shortener::{self, PostgresUrlRepository, ShortenerService};
use shortstack::telemetry::Telemetry;

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shortstack shortener
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
    let config = ShortenerConfig::from_env()?;

    let _telemetry = Telemetry::init(
        "shortener",
        config.tracing_collector_addr.as_deref(),
        &args.log_level,
    )?;

    info!("Starting Shortstack shortener");

    // Every dependency is checked at startup; failures here are fatal.
    let repository = Arc::new(PostgresUrlRepository::connect(&config.postgres_url).await?);
    let cache = Arc::new(
        ValkeyCache::connect(&config.valkey_addr, config.valkey_password.as_deref()).await?,
    );
    let kafka = Arc::new(KafkaBus::connect(&config.kafka_addr)?);
    let (events, publisher_drain) = EventPublisher::spawn(kafka);

    let service = Arc::new(ShortenerService::new(
        repository,
        cache.clone(),
        events,
        config.max_batch_workers,
    ));

    let shutdown = CancellationToken::new();

    let hot_set_consumer = bus::create_consumer(
        &config.kafka_addr,
        bus::GROUP_SHORTENER,
        &[bus::TOPIC_TOP_UNSHORTENED],
    )?;
    let consumer_task = tokio::spawn(shortener::consumer::run(
        hot_set_consumer,
        cache as Arc<dyn UrlCache>,
        shutdown.clone(),
    ));

    let addr: SocketAddr = config.server_addr.parse()?;
    let server_task = tokio::spawn(shortener::grpc::run_grpc_server(
        addr,
        service.clone(),
        shutdown.clone(),
    ));

    shutdown_signal().await;
    info!("Shutting down");
    shutdown.cancel();

    let _ = tokio::time::timeout(Duration::from_secs(10), async {
        let _ = server_task.await;
        let _ = consumer_task.await;
    })
    .await;

    // Last publisher handle gone, the queue drains and the task exits.
    drop(service);
    let _ = tokio::time::timeout(Duration::from_secs(5), publisher_drain).await;

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
