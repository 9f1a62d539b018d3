//! Postgres repository for the canonical URL mapping.
//!
//! One table, `urls(id BIGSERIAL, url TEXT UNIQUE)`. Rows are never updated
//! or deleted; `(id, url)` is a bijection.

use crate::{Error, Result};

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Authoritative `id <-> url` storage.
#[async_trait]
pub trait UrlRepository: Send + Sync {
    /// Id of an already-stored URL, if any.
    async fn get_id(&self, url: &str) -> Result<Option<i64>>;

    /// Store a URL and return its id. Upserts on the unique constraint so
    /// two concurrent first-shortens of one URL converge on the same id.
    async fn store_url(&self, url: &str) -> Result<i64>;

    /// URL for an id, if any.
    async fn get_url(&self, id: i64) -> Result<Option<String>>;
}

pub struct PostgresUrlRepository {
    pool: PgPool,
}

impl PostgresUrlRepository {
    /// Connect the pool and bring the schema up to date.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(100).connect(dsn).await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::Internal(format!("failed to run migrations: {e}")))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl UrlRepository for PostgresUrlRepository {
    async fn get_id(&self, url: &str) -> Result<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM urls WHERE url = $1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn store_url(&self, url: &str) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO urls (url) VALUES ($1) \
             ON CONFLICT (url) DO UPDATE SET url = EXCLUDED.url \
             RETURNING id",
        )
        .bind(url)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get_url(&self, id: i64) -> Result<Option<String>> {
        let url = sqlx::query_scalar::<_, String>("SELECT url FROM urls WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(url)
    }
}
