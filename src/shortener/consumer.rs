//! Hot-set consumer: warms the resolution cache from
//! `shortener.top_unshortened`.
//!
//! Each entry is written with NX and a TTL of `valid_until - now`, so a key
//! already populated by a concurrent real resolve keeps its TTL and replayed
//! messages cannot extend expiry. Per-entry failures are logged and do not
//! fail the message.

use crate::cache::UrlCache;
use crate::models::HotSet;
use crate::telemetry::extract_trace_headers;
use crate::bus;

use chrono::{DateTime, Utc};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Message;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Consume the hot-set topic until shutdown fires.
pub async fn run(
    consumer: StreamConsumer,
    cache: Arc<dyn UrlCache>,
    shutdown: CancellationToken,
) {
    info!(topic = bus::TOPIC_TOP_UNSHORTENED, "Hot-set consumer running");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = consumer.recv() => {
                let message = match received {
                    Ok(message) => message,
                    Err(e) => {
                        error!(error = %e, "Failed to read message");
                        continue;
                    }
                };

                let _cx = extract_trace_headers(&bus::message_headers(&message));

                match message
                    .payload()
                    .map(serde_json::from_slice::<HotSet>)
                    .transpose()
                {
                    Ok(Some(hot_set)) => {
                        let (warmed, skipped) =
                            warm_hot_set(cache.as_ref(), &hot_set, Utc::now()).await;
                        debug!(warmed, skipped, "Hot set applied");
                    }
                    Ok(None) => warn!("Skipping message without payload"),
                    Err(e) => {
                        warn!(error = %e, "Skipping malformed hot-set payload");
                    }
                }

                if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                    warn!(error = %e, "Failed to commit offset");
                }
            }
        }
    }
    info!("Hot-set consumer stopped");
}

/// Write every entry of a hot set into the cache. Entries whose validity
/// already lapsed are skipped. Returns `(warmed, skipped)` counts, where
/// skipped includes NX refusals, lapsed entries, and write errors.
pub async fn warm_hot_set(
    cache: &dyn UrlCache,
    hot_set: &HotSet,
    now: DateTime<Utc>,
) -> (usize, usize) {
    let mut warmed = 0;
    let mut skipped = 0;

    let ttl = match (hot_set.valid_until - now).to_std() {
        Ok(ttl) if !ttl.is_zero() => ttl,
        _ => {
            warn!(valid_until = %hot_set.valid_until, "Hot set already expired, ignoring");
            return (0, hot_set.top.len());
        }
    };

    for entry in &hot_set.top {
        match cache.warm(&entry.short_code, &entry.original_url, ttl).await {
            Ok(true) => warmed += 1,
            Ok(false) => skipped += 1,
            Err(e) => {
                warn!(code = %entry.short_code, error = %e, "Failed to warm cache entry");
                skipped += 1;
            }
        }
    }

    (warmed, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TopEntry;
    use crate::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MemoryCache {
        entries: Mutex<HashMap<String, (String, Duration)>>,
    }

    #[async_trait]
    impl UrlCache for MemoryCache {
        async fn get(&self, code: &str) -> Result<Option<String>> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .get(code)
                .map(|(url, _)| url.clone()))
        }

        async fn warm(&self, code: &str, url: &str, ttl: Duration) -> Result<bool> {
            let mut entries = self.entries.lock().unwrap();
            if entries.contains_key(code) {
                return Ok(false);
            }
            entries.insert(code.to_string(), (url.to_string(), ttl));
            Ok(true)
        }
    }

    fn hot_set(valid_for_secs: i64) -> HotSet {
        HotSet {
            valid_until: Utc::now() + chrono::Duration::seconds(valid_for_secs),
            top: vec![
                TopEntry {
                    original_url: "https://go.dev".to_string(),
                    short_code: "1".to_string(),
                },
                TopEntry {
                    original_url: "https://gitlab.com".to_string(),
                    short_code: "2".to_string(),
                },
            ],
        }
    }

    #[tokio::test]
    async fn warms_every_entry_with_remaining_ttl() {
        let cache = MemoryCache::default();
        let set = hot_set(600);

        let (warmed, skipped) = warm_hot_set(&cache, &set, Utc::now()).await;
        assert_eq!((warmed, skipped), (2, 0));

        let entries = cache.entries.lock().unwrap();
        let (url, ttl) = entries.get("1").unwrap();
        assert_eq!(url, "https://go.dev");
        assert!(*ttl <= Duration::from_secs(600));
        assert!(*ttl > Duration::from_secs(590));
    }

    #[tokio::test]
    async fn nx_preserves_concurrently_resolved_entries() {
        let cache = MemoryCache::default();
        cache
            .warm("1", "https://go.dev", Duration::from_secs(30))
            .await
            .unwrap();

        let (warmed, skipped) = warm_hot_set(&cache, &hot_set(600), Utc::now()).await;
        assert_eq!((warmed, skipped), (1, 1));

        // The pre-existing entry kept its shorter TTL.
        let entries = cache.entries.lock().unwrap();
        assert_eq!(entries.get("1").unwrap().1, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn expired_hot_set_is_ignored() {
        let cache = MemoryCache::default();
        let (warmed, skipped) = warm_hot_set(&cache, &hot_set(-5), Utc::now()).await;
        assert_eq!((warmed, skipped), (0, 2));
        assert!(cache.entries.lock().unwrap().is_empty());
    }
}
