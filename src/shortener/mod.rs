//! Shortener service: owns the URL <-> code mapping.
//!
//! `shorten` stores a URL once and returns its base-62 code; `resolve` goes
//! cache-first and falls back to the store. Both emit analytics events
//! through the fire-and-forget publisher; emission never blocks or fails the
//! RPC. A repeated shorten of a known URL returns the existing code and
//! emits nothing: the `shortener.shortened` stream is an insert log.

pub mod consumer;
pub mod grpc;
mod repository;

pub use repository::{PostgresUrlRepository, UrlRepository};

use crate::base62;
use crate::bus::EventPublisher;
use crate::cache::UrlCache;
use crate::models::{BatchEntry, ResolvedEvent, Shortened, ShortenedEvent};
use crate::{Error, Result};

use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{info, warn};

pub struct ShortenerService {
    repository: Arc<dyn UrlRepository>,
    cache: Arc<dyn UrlCache>,
    events: EventPublisher,
    max_batch_workers: usize,
}

impl ShortenerService {
    pub fn new(
        repository: Arc<dyn UrlRepository>,
        cache: Arc<dyn UrlCache>,
        events: EventPublisher,
        max_batch_workers: usize,
    ) -> Self {
        Self {
            repository,
            cache,
            events,
            max_batch_workers: max_batch_workers.max(1),
        }
    }

    /// Shorten one URL. Idempotent per URL: the first call inserts and emits
    /// a `shortened` event, later calls return the same code.
    pub async fn shorten(&self, raw_url: &str) -> Result<Shortened> {
        validate_url(raw_url)?;

        if let Some(id) = self.repository.get_id(raw_url).await? {
            return Ok(Shortened {
                code: base62::encode(id as u64),
                original_url: raw_url.to_string(),
            });
        }

        info!(url = raw_url, "Shortening URL");
        let id = self.repository.store_url(raw_url).await?;
        let code = base62::encode(id as u64);

        self.events.shortened(&ShortenedEvent {
            shortened_at: Utc::now(),
            original_url: raw_url.to_string(),
            short_code: code.clone(),
        });

        Ok(Shortened {
            code,
            original_url: raw_url.to_string(),
        })
    }

    /// Shorten many URLs with bounded concurrency. The response preserves
    /// request order; a bad entry gets an error instead of failing the batch.
    pub async fn shorten_batch(&self, urls: Vec<String>) -> Vec<BatchEntry> {
        futures::stream::iter(urls.into_iter().map(|url| async move {
            match self.shorten(&url).await {
                Ok(shortened) => BatchEntry {
                    original_url: url,
                    code: Some(shortened.code),
                    error: None,
                },
                Err(e) => BatchEntry {
                    original_url: url,
                    code: None,
                    error: Some(e.public_message()),
                },
            }
        }))
        .buffered(self.max_batch_workers)
        .collect()
        .await
    }

    /// Resolve a code to its URL, cache first. Cache errors degrade to a
    /// miss. Every successful resolve emits one `unshortened` event.
    pub async fn resolve(&self, code: &str) -> Result<String> {
        let id = base62::decode(code)?;

        match self.cache.get(code).await {
            Ok(Some(url)) => {
                self.emit_resolved(code, &url);
                return Ok(url);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(code, error = %e, "Cache lookup failed, falling through to store");
            }
        }

        let id = i64::try_from(id).map_err(|_| Error::NotFound)?;
        let url = self.repository.get_url(id).await?.ok_or(Error::NotFound)?;
        self.emit_resolved(code, &url);
        Ok(url)
    }

    fn emit_resolved(&self, code: &str, url: &str) {
        self.events.resolved(&ResolvedEvent {
            unshortened_at: Utc::now(),
            original_url: url.to_string(),
            short_code: code.to_string(),
        });
    }
}

/// Shorten accepts absolute URIs only. The raw string is what gets stored;
/// parsing is validation, not normalization.
fn validate_url(raw: &str) -> Result<()> {
    url::Url::parse(raw).map_err(|e| Error::InvalidUrl(format!("{e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{EventBus, TOPIC_SHORTENED, TOPIC_UNSHORTENED};
    use crate::telemetry::HeaderMap;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MemoryRepository {
        urls: Mutex<Vec<String>>,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl UrlRepository for MemoryRepository {
        async fn get_id(&self, url: &str) -> Result<Option<i64>> {
            let urls = self.urls.lock().unwrap();
            Ok(urls
                .iter()
                .position(|u| u == url)
                .map(|pos| pos as i64 + 1))
        }

        async fn store_url(&self, url: &str) -> Result<i64> {
            let mut urls = self.urls.lock().unwrap();
            urls.push(url.to_string());
            Ok(urls.len() as i64)
        }

        async fn get_url(&self, id: i64) -> Result<Option<String>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let urls = self.urls.lock().unwrap();
            Ok(usize::try_from(id)
                .ok()
                .and_then(|id| id.checked_sub(1))
                .and_then(|idx| urls.get(idx).cloned()))
        }
    }

    #[derive(Default)]
    struct MemoryCache {
        entries: Mutex<HashMap<String, String>>,
        fail_reads: bool,
    }

    #[async_trait]
    impl UrlCache for MemoryCache {
        async fn get(&self, code: &str) -> Result<Option<String>> {
            if self.fail_reads {
                return Err(Error::Internal("cache down".into()));
            }
            Ok(self.entries.lock().unwrap().get(code).cloned())
        }

        async fn warm(&self, code: &str, url: &str, _ttl: Duration) -> Result<bool> {
            let mut entries = self.entries.lock().unwrap();
            if entries.contains_key(code) {
                return Ok(false);
            }
            entries.insert(code.to_string(), url.to_string());
            Ok(true)
        }
    }

    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<(String, serde_json::Value)>>,
    }

    #[async_trait]
    impl EventBus for RecordingBus {
        async fn publish(
            &self,
            topic: &str,
            payload: Vec<u8>,
            _headers: HeaderMap,
        ) -> Result<()> {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), serde_json::from_slice(&payload)?));
            Ok(())
        }
    }

    struct Fixture {
        repository: Arc<MemoryRepository>,
        cache: Arc<MemoryCache>,
        bus: Arc<RecordingBus>,
        service: ShortenerService,
        drain: tokio::task::JoinHandle<()>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_cache(MemoryCache::default())
        }

        fn with_cache(cache: MemoryCache) -> Self {
            let repository = Arc::new(MemoryRepository::default());
            let cache = Arc::new(cache);
            let bus = Arc::new(RecordingBus::default());
            let (events, drain) = EventPublisher::spawn(bus.clone());
            let service =
                ShortenerService::new(repository.clone(), cache.clone(), events, 10);
            Self {
                repository,
                cache,
                bus,
                service,
                drain,
            }
        }

        /// Shut the publisher down and return everything that reached the bus.
        async fn published(self) -> Vec<(String, serde_json::Value)> {
            drop(self.service);
            self.drain.await.unwrap();
            Arc::try_unwrap(self.bus)
                .ok()
                .unwrap()
                .published
                .into_inner()
                .unwrap()
        }
    }

    #[tokio::test]
    async fn shorten_fresh_url_assigns_code_and_emits() {
        let f = Fixture::new();

        let shortened = f.service.shorten("https://go.dev").await.unwrap();
        assert_eq!(shortened.code, "1");
        assert_eq!(shortened.original_url, "https://go.dev");

        let published = f.published().await;
        assert_eq!(published.len(), 1);
        let (topic, payload) = &published[0];
        assert_eq!(topic, TOPIC_SHORTENED);
        assert_eq!(payload["original_url"], "https://go.dev");
        assert_eq!(payload["short_code"], "1");
    }

    #[tokio::test]
    async fn shorten_duplicate_reuses_code_without_insert_or_event() {
        let f = Fixture::new();

        let first = f.service.shorten("https://go.dev").await.unwrap();
        let second = f.service.shorten("https://go.dev").await.unwrap();
        assert_eq!(first.code, second.code);
        assert_eq!(f.repository.urls.lock().unwrap().len(), 1);

        let published = f.published().await;
        assert_eq!(published.len(), 1, "duplicate shorten must not emit");
    }

    #[tokio::test]
    async fn shorten_rejects_relative_url() {
        let f = Fixture::new();

        let err = f.service.shorten("not a url").await.unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));

        assert!(f.published().await.is_empty());
    }

    #[tokio::test]
    async fn batch_preserves_order_and_isolates_errors() {
        let f = Fixture::new();

        let entries = f
            .service
            .shorten_batch(vec![
                "https://go.dev".to_string(),
                "not a url".to_string(),
                "https://gitlab.com".to_string(),
            ])
            .await;

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].original_url, "https://go.dev");
        assert!(entries[0].code.is_some() && entries[0].error.is_none());
        assert_eq!(entries[1].original_url, "not a url");
        assert!(entries[1].code.is_none());
        assert!(entries[1].error.as_deref().unwrap().contains("invalid URL"));
        assert_eq!(entries[2].original_url, "https://gitlab.com");
        assert!(entries[2].code.is_some() && entries[2].error.is_none());
    }

    #[tokio::test]
    async fn resolve_store_hit_emits_event() {
        let f = Fixture::new();
        f.service.shorten("https://go.dev").await.unwrap();

        let url = f.service.resolve("1").await.unwrap();
        assert_eq!(url, "https://go.dev");

        let published = f.published().await;
        let resolved: Vec<_> = published
            .iter()
            .filter(|(topic, _)| topic == TOPIC_UNSHORTENED)
            .collect();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].1["original_url"], "https://go.dev");
        assert_eq!(resolved[0].1["short_code"], "1");
    }

    #[tokio::test]
    async fn resolve_prefers_cache_over_store() {
        let f = Fixture::new();
        f.cache
            .warm("7", "https://cached.example", Duration::from_secs(60))
            .await
            .unwrap();

        let url = f.service.resolve("7").await.unwrap();
        assert_eq!(url, "https://cached.example");
        assert_eq!(f.repository.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resolve_treats_cache_error_as_miss() {
        let f = Fixture::with_cache(MemoryCache {
            fail_reads: true,
            ..Default::default()
        });
        f.service.shorten("https://go.dev").await.unwrap();

        let url = f.service.resolve("1").await.unwrap();
        assert_eq!(url, "https://go.dev");
        assert_eq!(f.repository.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolve_unknown_code_is_not_found() {
        let f = Fixture::new();
        let err = f.service.resolve("zz").await.unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[tokio::test]
    async fn resolve_malformed_code_is_invalid() {
        let f = Fixture::new();
        let err = f.service.resolve("no-such!").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCode(_)));
    }
}
