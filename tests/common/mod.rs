//! Shared in-memory fakes for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use shortstack::bus::EventBus;
use shortstack::cache::{LeaderLock, UrlCache};
use shortstack::models::TopEntry;
use shortstack::shortener::UrlRepository;
use shortstack::statistics::{AnalyticsStore, BatchSink};
use shortstack::telemetry::HeaderMap;
use shortstack::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Vec-backed URL repository: id is position + 1, like a bigserial column.
#[derive(Default)]
pub struct MemoryRepository {
    pub urls: Mutex<Vec<String>>,
}

#[async_trait]
impl UrlRepository for MemoryRepository {
    async fn get_id(&self, url: &str) -> Result<Option<i64>> {
        let urls = self.urls.lock().unwrap();
        Ok(urls.iter().position(|u| u == url).map(|pos| pos as i64 + 1))
    }

    async fn store_url(&self, url: &str) -> Result<i64> {
        let mut urls = self.urls.lock().unwrap();
        if let Some(pos) = urls.iter().position(|u| u == url) {
            return Ok(pos as i64 + 1);
        }
        urls.push(url.to_string());
        Ok(urls.len() as i64)
    }

    async fn get_url(&self, id: i64) -> Result<Option<String>> {
        let urls = self.urls.lock().unwrap();
        Ok(usize::try_from(id)
            .ok()
            .and_then(|id| id.checked_sub(1))
            .and_then(|idx| urls.get(idx).cloned()))
    }
}

/// NX-faithful cache fake that remembers the TTL each entry was stored with.
#[derive(Default)]
pub struct MemoryCache {
    pub entries: Mutex<HashMap<String, (String, Duration)>>,
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

/// Bus fake that records every publish.
#[derive(Default)]
pub struct RecordingBus {
    pub published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingBus {
    pub fn payloads<T: serde::de::DeserializeOwned>(&self, topic: &str) -> Vec<T> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| serde_json::from_slice(payload).unwrap())
            .collect()
    }
}

#[async_trait]
impl EventBus for RecordingBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>, _headers: HeaderMap) -> Result<()> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }
}

/// Lock fake with SET NX semantics: first acquirer holds until reset.
#[derive(Default)]
pub struct SingleWinnerLock {
    held: AtomicBool,
}

impl SingleWinnerLock {
    /// Simulate TTL expiry.
    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl LeaderLock for SingleWinnerLock {
    async fn try_acquire(&self, _ttl: Duration) -> Result<bool> {
        Ok(!self.held.swap(true, Ordering::SeqCst))
    }
}

/// Analytics-store fake: serves a fixed top list.
pub struct FixedStore {
    pub top: Vec<TopEntry>,
}

#[async_trait]
impl AnalyticsStore for FixedStore {
    async fn top_resolved(&self, limit: usize, _window: Duration) -> Result<Vec<TopEntry>> {
        Ok(self.top.iter().take(limit).cloned().collect())
    }
}

/// Batch sink that records every flushed batch.
pub struct RecordingSink<R> {
    pub batches: Mutex<Vec<Vec<R>>>,
}

impl<R> Default for RecordingSink<R> {
    fn default() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl<R: Send + Sync + Clone + 'static> BatchSink<R> for RecordingSink<R> {
    async fn write_batch(&self, rows: Vec<R>) -> Result<()> {
        self.batches.lock().unwrap().push(rows);
        Ok(())
    }
}
