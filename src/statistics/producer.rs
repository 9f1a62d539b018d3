//! Leader-elected hot-set producer.
//!
//! On each cron tick every replica races one atomic NX+TTL write on the
//! cache; the winner queries the top-N and publishes, everyone else skips
//! the tick silently. The lock is never released: its TTL both bounds a dead
//! leader's reign and spaces publishes. The work is an idempotent snapshot,
//! so a skipped or repeated tick is harmless.

use crate::bus::{self, EventBus};
use crate::cache::LeaderLock;
use crate::models::HotSet;
use crate::statistics::clickhouse::AnalyticsStore;
use crate::Result;

use chrono::{DateTime, Utc};
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// What one tick did; logged and asserted on in tests.
#[derive(Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Published(usize),
    LeadershipDenied,
    EmptyWindow,
}

struct ProducerInstruments {
    ticks: Counter<u64>,
}

fn instruments() -> &'static ProducerInstruments {
    static INSTRUMENTS: OnceLock<ProducerInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("shortstack.statistics");
        ProducerInstruments {
            ticks: meter
                .u64_counter("shortstack.producer.ticks")
                .with_description("Producer tick outcomes")
                .init(),
        }
    })
}

pub struct HotSetProducer {
    store: Arc<dyn AnalyticsStore>,
    lock: Arc<dyn LeaderLock>,
    bus: Arc<dyn EventBus>,
    /// Hot set size.
    top_amount: usize,
    /// Trailing query window; also how long the published set stays valid.
    top_ttl: Duration,
    /// Leadership TTL; keep at or below the cron interval.
    lock_ttl: Duration,
}

impl HotSetProducer {
    pub fn new(
        store: Arc<dyn AnalyticsStore>,
        lock: Arc<dyn LeaderLock>,
        bus: Arc<dyn EventBus>,
        top_amount: usize,
        top_ttl: Duration,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            store,
            lock,
            bus,
            top_amount,
            top_ttl,
            lock_ttl,
        }
    }

    /// Tick loop; one `produce` attempt per scheduler tick.
    pub async fn run(
        self,
        mut ticks: mpsc::Receiver<DateTime<Utc>>,
        shutdown: CancellationToken,
    ) {
        info!(
            top_amount = self.top_amount,
            top_ttl_secs = self.top_ttl.as_secs(),
            "Hot-set producer running"
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                tick = ticks.recv() => match tick {
                    None => break,
                    Some(at) => match self.produce(at).await {
                        Ok(outcome) => {
                            debug!(?outcome, "Producer tick complete");
                            instruments()
                                .ticks
                                .add(1, &[KeyValue::new("outcome", outcome_label(&outcome))]);
                        }
                        Err(e) => {
                            error!(error = %e, "Producer tick failed");
                            instruments()
                                .ticks
                                .add(1, &[KeyValue::new("outcome", "error")]);
                        }
                    },
                },
            }
        }
        info!("Hot-set producer stopped");
    }

    /// One aggregation attempt. Losing the lock race is not an error.
    pub async fn produce(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        if !self.lock.try_acquire(self.lock_ttl).await? {
            debug!("Another replica holds the top lock, skipping tick");
            return Ok(TickOutcome::LeadershipDenied);
        }

        let top = self.store.top_resolved(self.top_amount, self.top_ttl).await?;
        if top.is_empty() {
            return Ok(TickOutcome::EmptyWindow);
        }

        let entries = top.len();
        let hot_set = HotSet {
            valid_until: now
                + chrono::Duration::from_std(self.top_ttl)
                    .unwrap_or_else(|_| chrono::Duration::seconds(0)),
            top,
        };

        info!(entries, "Publishing hot set");
        bus::publish_hot_set(self.bus.as_ref(), &hot_set).await?;
        Ok(TickOutcome::Published(entries))
    }
}

fn outcome_label(outcome: &TickOutcome) -> &'static str {
    match outcome {
        TickOutcome::Published(_) => "published",
        TickOutcome::LeadershipDenied => "leadership_denied",
        TickOutcome::EmptyWindow => "empty_window",
    }
}
