//! Environment-based configuration for the three service binaries.
//!
//! Every recognized option is an environment variable; a missing required
//! variable is a startup error and the process exits before touching any
//! dependency. Binaries layer `clap` on top only for operational flags
//! (log level), not for wiring.

use crate::{Error, Result};
use std::time::Duration;

/// Configuration for the shortener (Coder) service.
#[derive(Debug, Clone)]
pub struct ShortenerConfig {
    /// gRPC listen address.
    pub server_addr: String,
    /// Relational store DSN.
    pub postgres_url: String,
    /// Bus broker address.
    pub kafka_addr: String,
    /// Cache address and optional auth.
    pub valkey_addr: String,
    pub valkey_password: Option<String>,
    /// Bound on concurrent per-URL work inside one ShortenBatch RPC.
    pub max_batch_workers: usize,
    /// OTLP trace collector; tracing is disabled when unset.
    pub tracing_collector_addr: Option<String>,
}

impl ShortenerConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server_addr: required("SERVER_ADDR")?,
            postgres_url: required("POSTGRES_URL")?,
            kafka_addr: required("KAFKA_ADDR")?,
            valkey_addr: required("VALKEY_ADDR")?,
            valkey_password: optional("VALKEY_PASSWORD"),
            max_batch_workers: parsed_or("MAX_BATCH_WORKERS", 10)?,
            tracing_collector_addr: optional("TRACING_COLLECTOR_ADDR"),
        })
    }
}

/// Configuration for the statistics (Analyzer) service.
#[derive(Debug, Clone)]
pub struct StatisticsConfig {
    /// HTTP listen address (metrics scrape).
    pub server_addr: String,
    /// Bus broker address.
    pub kafka_addr: String,
    /// Columnar store connection.
    pub clickhouse_addr: String,
    pub clickhouse_user: String,
    pub clickhouse_password: String,
    /// Batch writer size trigger.
    pub clickhouse_batch_size: usize,
    /// Cache address and optional auth (leader lock lives here).
    pub valkey_addr: String,
    pub valkey_password: Option<String>,
    /// Trailing window and validity of the hot set, in seconds.
    pub top_ttl: Duration,
    /// Hot set size.
    pub top_amount: usize,
    /// Leader lock TTL. Should not exceed the cron interval, or a dead
    /// leader blocks the next tick.
    pub lock_ttl: Duration,
    /// 5-field crontab driving the producer.
    pub scheduler_crontab: String,
    /// OTLP trace collector; tracing is disabled when unset.
    pub tracing_collector_addr: Option<String>,
}

impl StatisticsConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server_addr: required("SERVER_ADDR")?,
            kafka_addr: required("KAFKA_ADDR")?,
            clickhouse_addr: required("CLICKHOUSE_ADDR")?,
            clickhouse_user: required("CLICKHOUSE_USER")?,
            clickhouse_password: required("CLICKHOUSE_PASSWORD")?,
            clickhouse_batch_size: parsed_or("CLICKHOUSE_BATCH_SIZE", 100)?,
            valkey_addr: required("VALKEY_ADDR")?,
            valkey_password: optional("VALKEY_PASSWORD"),
            top_ttl: Duration::from_secs(parsed_or("TOP_TTL", 3600)?),
            top_amount: parsed_or("TOP_AMOUNT", 100)?,
            lock_ttl: Duration::from_secs(parsed_or("PRODUCER_LOCK_INTERVAL_SECONDS", 300)?),
            scheduler_crontab: optional("PRODUCER_SCHEDULER_CRONTAB")
                .unwrap_or_else(|| "0 * * * *".to_string()),
            tracing_collector_addr: optional("TRACING_COLLECTOR_ADDR"),
        })
    }
}

/// Configuration for the gateway (Edge) service.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// HTTP listen address.
    pub server_addr: String,
    /// Public URL prefix prepended to codes in responses.
    pub public_host: String,
    /// Allowed CORS origin; `*` when unset.
    pub cors_origin: Option<String>,
    /// Shortener gRPC address.
    pub grpc_server_addr: String,
    /// OTLP trace collector; tracing is disabled when unset.
    pub tracing_collector_addr: Option<String>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server_addr: required("SERVER_ADDR")?,
            public_host: required("PUBLIC_HOST")?,
            cors_origin: optional("CORS_ORIGIN"),
            grpc_server_addr: required("GRPC_SERVER_ADDR")?,
            tracing_collector_addr: optional("TRACING_COLLECTOR_ADDR"),
        })
    }
}

fn required(name: &str) -> Result<String> {
    optional(name).ok_or_else(|| Error::Config(format!("{name} is required")))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("{name} is invalid: {e}"))),
    }
}
