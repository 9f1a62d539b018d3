//! Domain and wire models.
//!
//! Bus payloads serialize to the JSON contract shared by all three services;
//! field names here are the wire format and must not drift. Analytic rows are
//! the columnar-store shape of the same events, decorated with a fresh UUID
//! at ingest for replay idempotency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bus payload for `shortener.shortened`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortenedEvent {
    pub shortened_at: DateTime<Utc>,
    pub original_url: String,
    pub short_code: String,
}

/// Bus payload for `shortener.unshortened`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEvent {
    pub unshortened_at: DateTime<Utc>,
    pub original_url: String,
    pub short_code: String,
}

/// One ranked entry of the hot set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopEntry {
    pub original_url: String,
    pub short_code: String,
}

/// Bus payload for `shortener.top_unshortened`: the most-resolved codes over
/// a trailing window, ranked descending, valid until `valid_until`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotSet {
    pub valid_until: DateTime<Utc>,
    pub top: Vec<TopEntry>,
}

/// Append-only row of the `shortened` table.
#[derive(Debug, Clone, clickhouse::Row, Serialize, Deserialize)]
pub struct ShortenedRow {
    #[serde(with = "clickhouse::serde::uuid")]
    pub event_id: Uuid,
    pub original_url: String,
    pub short_code: String,
    #[serde(with = "clickhouse::serde::chrono::datetime")]
    pub shortened_at: DateTime<Utc>,
}

impl ShortenedRow {
    /// Decorate a bus event with a fresh event id.
    pub fn from_event(event: ShortenedEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            original_url: event.original_url,
            short_code: event.short_code,
            shortened_at: event.shortened_at,
        }
    }
}

/// Append-only row of the `unshortened` table.
#[derive(Debug, Clone, clickhouse::Row, Serialize, Deserialize)]
pub struct ResolvedRow {
    #[serde(with = "clickhouse::serde::uuid")]
    pub event_id: Uuid,
    pub original_url: String,
    pub short_code: String,
    #[serde(with = "clickhouse::serde::chrono::datetime")]
    pub unshortened_at: DateTime<Utc>,
}

impl ResolvedRow {
    /// Decorate a bus event with a fresh event id.
    pub fn from_event(event: ResolvedEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            original_url: event.original_url,
            short_code: event.short_code,
            unshortened_at: event.unshortened_at,
        }
    }
}

/// Result of a successful `Shorten`.
#[derive(Debug, Clone, PartialEq)]
pub struct Shortened {
    pub code: String,
    pub original_url: String,
}

/// One entry of a `ShortenBatch` response. Exactly one of `code` / `error`
/// is populated; order matches the request.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub original_url: String,
    pub code: Option<String>,
    pub error: Option<String>,
}
