//! Ingest-to-store pipeline and hot-set feedback loop, exercised with
//! in-memory fakes in place of Kafka, ClickHouse, and Valkey.

mod common;

use common::{FixedStore, MemoryCache, RecordingBus, RecordingSink, SingleWinnerLock};
use shortstack::bus::TOPIC_TOP_UNSHORTENED;
use shortstack::cache::UrlCache;
use shortstack::models::{HotSet, ResolvedEvent, ShortenedEvent, ShortenedRow, TopEntry};
use shortstack::shortener::consumer::warm_hot_set;
use shortstack::statistics::{BatchWriter, HotSetProducer, IngestService, TickOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn shortened_event(code: &str) -> ShortenedEvent {
    ShortenedEvent {
        shortened_at: chrono::Utc::now(),
        original_url: format!("https://example.com/{code}"),
        short_code: code.to_string(),
    }
}

fn resolved_event(code: &str) -> ResolvedEvent {
    ResolvedEvent {
        unshortened_at: chrono::Utc::now(),
        original_url: format!("https://example.com/{code}"),
        short_code: code.to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn events_flow_from_ingest_to_store_in_bounded_batches() {
    let (ingest, shortened_rx, resolved_rx) = IngestService::channels();
    let shortened_sink = Arc::new(RecordingSink::default());
    let resolved_sink = Arc::new(RecordingSink::default());
    let shutdown = CancellationToken::new();

    let shortened_task = tokio::spawn(
        BatchWriter::new(shortened_rx, shortened_sink.clone(), 4, "shortened")
            .run(shutdown.clone()),
    );
    let resolved_task = tokio::spawn(
        BatchWriter::new(resolved_rx, resolved_sink.clone(), 4, "unshortened")
            .run(shutdown.clone()),
    );

    // Nine shortened events: two full size-triggered batches plus one row
    // that only the tick can flush.
    for i in 0..9 {
        ingest.shortened(shortened_event(&format!("s{i}"))).await;
    }
    ingest.resolved(resolved_event("r0")).await;

    tokio::time::sleep(Duration::from_secs(11)).await;

    {
        let batches = shortened_sink.batches.lock().unwrap();
        let flushed: usize = batches.iter().map(Vec::len).sum();
        assert_eq!(flushed, 9, "no shortened row may be lost");
        assert_eq!(batches.len(), 3, "two size flushes and one tick flush");
        assert!(batches.iter().all(|batch| batch.len() <= 4));
    }
    {
        let batches = resolved_sink.batches.lock().unwrap();
        let flushed: usize = batches.iter().map(Vec::len).sum();
        assert_eq!(flushed, 1);
    }

    // The writers are independent: the resolved flush carried resolved rows
    // only, decorated with fresh event ids.
    let shortened_rows: Vec<ShortenedRow> = shortened_sink
        .batches
        .lock()
        .unwrap()
        .iter()
        .flatten()
        .cloned()
        .collect();
    let mut ids: Vec<_> = shortened_rows.iter().map(|row| row.event_id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 9, "event ids are unique");

    shutdown.cancel();
    shortened_task.await.unwrap();
    resolved_task.await.unwrap();
}

#[tokio::test]
async fn one_leader_per_tick_and_consumers_warm_the_cache() {
    let lock = Arc::new(SingleWinnerLock::default());
    let bus = Arc::new(RecordingBus::default());
    let top = vec![
        TopEntry {
            original_url: "https://example.com/a".to_string(),
            short_code: "1".to_string(),
        },
        TopEntry {
            original_url: "https://example.com/b".to_string(),
            short_code: "2".to_string(),
        },
    ];

    let replicas: Vec<_> = (0..3)
        .map(|_| {
            HotSetProducer::new(
                Arc::new(FixedStore { top: top.clone() }),
                lock.clone(),
                bus.clone(),
                100,
                Duration::from_secs(3600),
                Duration::from_secs(300),
            )
        })
        .collect();

    // All replicas tick at once; the NX write lets exactly one through.
    let now = chrono::Utc::now();
    let outcomes =
        futures::future::join_all(replicas.iter().map(|replica| replica.produce(now))).await;
    let outcomes: Vec<_> = outcomes.into_iter().map(|o| o.unwrap()).collect();

    let published: Vec<HotSet> = bus.payloads(TOPIC_TOP_UNSHORTENED);
    assert_eq!(published.len(), 1, "exactly one publish per tick");
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, TickOutcome::Published(_)))
            .count(),
        1
    );
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, TickOutcome::LeadershipDenied))
            .count(),
        2
    );

    // The published hot set warms the cache the way the shortener-side
    // consumer would.
    let cache = MemoryCache::default();
    let (warmed, skipped) = warm_hot_set(&cache, &published[0], now).await;
    assert_eq!((warmed, skipped), (2, 0));
    assert_eq!(
        cache.get("1").await.unwrap().as_deref(),
        Some("https://example.com/a")
    );

    // Consuming the same message twice must not rewrite (or re-TTL) entries.
    let (warmed, skipped) = warm_hot_set(&cache, &published[0], now).await;
    assert_eq!((warmed, skipped), (0, 2));

    // After the lock's TTL lapses, the next tick elects a leader again.
    lock.release();
    let outcome = replicas[0].produce(chrono::Utc::now()).await.unwrap();
    assert!(matches!(outcome, TickOutcome::Published(2)));
}
