//! ClickHouse access for the analytics pipeline.
//!
//! Both tables are append-only; writes go through batched inserts prepared
//! per flush. The top-N query pushes the time predicate down so scan volume
//! is bounded by the window, not the table's lifetime.

use crate::models::{ResolvedRow, ShortenedRow, TopEntry};
use crate::statistics::batch::BatchSink;
use crate::Result;

use async_trait::async_trait;
use clickhouse::Client;
use serde::Deserialize;
use std::time::Duration;

/// Aggregate queries over the columnar store.
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// The `limit` most-resolved `(original_url, short_code)` pairs within
    /// the trailing `window`, ranked by resolution count descending.
    async fn top_resolved(&self, limit: usize, window: Duration) -> Result<Vec<TopEntry>>;
}

#[derive(Debug, clickhouse::Row, Deserialize)]
struct TopRow {
    original_url: String,
    short_code: String,
}

#[derive(Clone)]
pub struct ClickHouseStore {
    client: Client,
}

impl ClickHouseStore {
    pub fn new(addr: &str, user: &str, password: &str) -> Self {
        let url = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        };
        let client = Client::default()
            .with_url(url)
            .with_user(user)
            .with_password(password)
            .with_database("default");
        Self { client }
    }

    /// Startup dependency check.
    pub async fn ping(&self) -> Result<()> {
        self.client.query("SELECT 1").execute().await?;
        Ok(())
    }
}

#[async_trait]
impl BatchSink<ShortenedRow> for ClickHouseStore {
    async fn write_batch(&self, rows: Vec<ShortenedRow>) -> Result<()> {
        let mut insert = self.client.insert("shortened")?;
        for row in &rows {
            insert.write(row).await?;
        }
        insert.end().await?;
        Ok(())
    }
}

#[async_trait]
impl BatchSink<ResolvedRow> for ClickHouseStore {
    async fn write_batch(&self, rows: Vec<ResolvedRow>) -> Result<()> {
        let mut insert = self.client.insert("unshortened")?;
        for row in &rows {
            insert.write(row).await?;
        }
        insert.end().await?;
        Ok(())
    }
}

#[async_trait]
impl AnalyticsStore for ClickHouseStore {
    async fn top_resolved(&self, limit: usize, window: Duration) -> Result<Vec<TopEntry>> {
        let rows = self
            .client
            .query(
                "SELECT original_url, short_code \
                 FROM unshortened \
                 WHERE unshortened_at > now() - toIntervalSecond(?) \
                 GROUP BY original_url, short_code \
                 ORDER BY count() DESC \
                 LIMIT ?",
            )
            .bind(window.as_secs())
            .bind(limit as u64)
            .fetch_all::<TopRow>()
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| TopEntry {
                original_url: row.original_url,
                short_code: row.short_code,
            })
            .collect())
    }
}
