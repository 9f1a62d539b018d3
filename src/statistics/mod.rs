//! Statistics service: the analytics half of the platform.
//!
//! Four cooperating subsystems share the process:
//! - **Consumer**: reads both event topics, group `statistics-group`.
//! - **Ingest**: counts events and decorates them into analytic rows.
//! - **Batch writers** (one per event kind): size-or-time bounded flushes
//!   into ClickHouse.
//! - **Producer**: cron-driven, leader-elected hot-set publisher.

pub mod batch;
pub mod clickhouse;
pub mod consumer;
pub mod producer;
pub mod service;

pub use batch::{BatchSink, BatchWriter};
pub use clickhouse::{AnalyticsStore, ClickHouseStore};
pub use producer::{HotSetProducer, TickOutcome};
pub use service::IngestService;
