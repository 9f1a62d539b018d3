//! Dual-trigger batch writer.
//!
//! Buffers rows from a bounded channel and flushes to the columnar store
//! when the buffer reaches the size threshold or on a periodic tick,
//! whichever comes first. Flushes are serialized within one writer. Events
//! are best-effort analytics: a failed flush is logged and the buffer is
//! reset regardless, so one bad batch cannot wedge the pipeline.

use crate::Result;

use async_trait::async_trait;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Periodic flush tick shared by both writers, keeping worst-case
/// ingest-to-store latency uniform across event kinds.
pub const TICK_PERIOD: Duration = Duration::from_secs(10);

/// Destination of one event kind's batches.
#[async_trait]
pub trait BatchSink<R>: Send + Sync {
    async fn write_batch(&self, rows: Vec<R>) -> Result<()>;
}

struct WriterInstruments {
    flush_triggers: Counter<u64>,
    flush_failures: Counter<u64>,
    flush_rows: Histogram<u64>,
}

fn instruments() -> &'static WriterInstruments {
    static INSTRUMENTS: OnceLock<WriterInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("shortstack.statistics");
        WriterInstruments {
            flush_triggers: meter
                .u64_counter("shortstack.batch.flush.triggers")
                .with_description("Flush trigger counts by stream and reason")
                .init(),
            flush_failures: meter
                .u64_counter("shortstack.batch.flush.failures")
                .with_description("Failed flushes by stream")
                .init(),
            flush_rows: meter
                .u64_histogram("shortstack.batch.flush.rows")
                .with_description("Rows written per flush")
                .init(),
        }
    })
}

pub struct BatchWriter<R> {
    rx: mpsc::Receiver<R>,
    sink: Arc<dyn BatchSink<R>>,
    batch_size: usize,
    tick_period: Duration,
    /// Stream label for logs and metrics (`shortened` / `unshortened`).
    stream: &'static str,
}

impl<R: Send + 'static> BatchWriter<R> {
    pub fn new(
        rx: mpsc::Receiver<R>,
        sink: Arc<dyn BatchSink<R>>,
        batch_size: usize,
        stream: &'static str,
    ) -> Self {
        Self {
            rx,
            sink,
            batch_size: batch_size.max(1),
            tick_period: TICK_PERIOD,
            stream,
        }
    }

    /// Override the tick period (tests drive this with a paused clock).
    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    /// Buffer-and-flush loop. Exits on shutdown or when the ingest side
    /// closes the channel; either way the remaining buffer gets a courtesy
    /// flush.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut pending: Vec<R> = Vec::with_capacity(self.batch_size);
        let start = tokio::time::Instant::now() + self.tick_period;
        let mut ticker = tokio::time::interval_at(start, self.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            stream = self.stream,
            batch_size = self.batch_size,
            "Batch writer running"
        );

        loop {
            tokio::select! {
                received = self.rx.recv() => match received {
                    Some(row) => {
                        pending.push(row);
                        if pending.len() >= self.batch_size {
                            self.flush(&mut pending, "size").await;
                        }
                    }
                    None => {
                        self.flush(&mut pending, "close").await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if !pending.is_empty() {
                        self.flush(&mut pending, "tick").await;
                    }
                }
                _ = shutdown.cancelled() => {
                    self.flush(&mut pending, "shutdown").await;
                    break;
                }
            }
        }

        info!(stream = self.stream, "Batch writer stopped");
    }

    async fn flush(&self, pending: &mut Vec<R>, reason: &'static str) {
        if pending.is_empty() {
            return;
        }
        let rows = std::mem::take(pending);
        let count = rows.len() as u64;

        let attrs = [
            KeyValue::new("stream", self.stream),
            KeyValue::new("reason", reason),
        ];
        instruments().flush_triggers.add(1, &attrs);
        instruments().flush_rows.record(count, &attrs);

        match self.sink.write_batch(rows).await {
            Ok(()) => debug!(stream = self.stream, rows = count, reason, "Flushed batch"),
            Err(e) => {
                // Best-effort analytics: the rows are gone either way.
                error!(stream = self.stream, rows = count, error = %e, "Failed to write batch");
                instruments()
                    .flush_failures
                    .add(1, &[KeyValue::new("stream", self.stream)]);
            }
        }
    }
}
