//! Shortstack gateway binary.
//!
//! HTTP façade in front of the shortener gRPC service.

use shortstack::config::GatewayConfig;
use shortstack::gateway::{build_router, GatewayState, GrpcShortenerClient};
use shortstack::telemetry::Telemetry;

use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

/// Shortstack gateway
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
    let config = GatewayConfig::from_env()?;

    let _telemetry = Telemetry::init(
        "gateway",
        config.tracing_collector_addr.as_deref(),
        &args.log_level,
    )?;

    info!("Starting Shortstack gateway");

    let client = Arc::new(GrpcShortenerClient::connect(&config.grpc_server_addr).await?);
    let state = Arc::new(GatewayState {
        client,
        public_host: config.public_host.clone(),
    });
    let router = build_router(state, config.cors_origin.as_deref())?;

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    info!(addr = %config.server_addr, "Gateway ready");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

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
