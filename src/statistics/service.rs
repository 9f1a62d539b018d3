//! Ingest side of the analytics pipeline.
//!
//! Counts each consumed event, decorates it with a fresh event id, and hands
//! it to the matching batch-writer channel. The channels are deliberately
//! shallow: when a writer lags, enqueue blocks, which stalls the bus
//! consumer and lets consumer-group lag absorb the pressure.

use crate::models::{ResolvedEvent, ResolvedRow, ShortenedEvent, ShortenedRow};

use opentelemetry::global;
use opentelemetry::metrics::Counter;
use std::sync::OnceLock;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Channel depth between ingest and each batch writer.
pub const INGEST_CHANNEL_CAPACITY: usize = 10;

struct IngestInstruments {
    shortened: Counter<u64>,
    unshortened: Counter<u64>,
    malformed: Counter<u64>,
}

fn instruments() -> &'static IngestInstruments {
    static INSTRUMENTS: OnceLock<IngestInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("shortstack.statistics");
        IngestInstruments {
            shortened: meter
                .u64_counter("shortener.shortened")
                .with_description("Shortened events consumed")
                .init(),
            unshortened: meter
                .u64_counter("shortener.unshortened")
                .with_description("Resolution events consumed")
                .init(),
            malformed: meter
                .u64_counter("shortener.ingest.malformed")
                .with_description("Bus payloads that failed to deserialize")
                .init(),
        }
    })
}

pub struct IngestService {
    shortened_tx: mpsc::Sender<ShortenedRow>,
    resolved_tx: mpsc::Sender<ResolvedRow>,
}

impl IngestService {
    /// Build the service plus the receiving ends for the two batch writers.
    pub fn channels() -> (
        Self,
        mpsc::Receiver<ShortenedRow>,
        mpsc::Receiver<ResolvedRow>,
    ) {
        let (shortened_tx, shortened_rx) = mpsc::channel(INGEST_CHANNEL_CAPACITY);
        let (resolved_tx, resolved_rx) = mpsc::channel(INGEST_CHANNEL_CAPACITY);
        (
            Self {
                shortened_tx,
                resolved_tx,
            },
            shortened_rx,
            resolved_rx,
        )
    }

    pub async fn shortened(&self, event: ShortenedEvent) {
        info!(
            url = %event.original_url,
            code = %event.short_code,
            at = %event.shortened_at,
            "Shortened URL"
        );
        instruments().shortened.add(1, &[]);

        if self
            .shortened_tx
            .send(ShortenedRow::from_event(event))
            .await
            .is_err()
        {
            warn!("Shortened batch channel closed, dropping row");
        }
    }

    pub async fn resolved(&self, event: ResolvedEvent) {
        info!(
            url = %event.original_url,
            code = %event.short_code,
            at = %event.unshortened_at,
            "Clicked on shortened URL"
        );
        instruments().unshortened.add(1, &[]);

        if self
            .resolved_tx
            .send(ResolvedRow::from_event(event))
            .await
            .is_err()
        {
            warn!("Resolved batch channel closed, dropping row");
        }
    }

    /// Count a payload the consumer could not deserialize.
    pub fn malformed(&self) {
        instruments().malformed.add(1, &[]);
    }
}
