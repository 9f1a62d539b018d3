//! Valkey-backed cache: resolution hot path and producer leader lock.
//!
//! Two concerns share the one cache instance: `code -> original_url` entries
//! with a TTL (consulted by Resolve before the relational store, written by
//! the hot-set consumer), and the `top_lock` key whose NX+TTL write elects
//! the single hot-set producer per interval. Warm writes use NX so a
//! concurrent real Resolve that already populated the key keeps its TTL.

use crate::Result;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

const TOP_LOCK_KEY: &str = "top_lock";
const TOP_LOCK_VALUE: &str = "held";

/// `code -> original_url` lookups and warming.
#[async_trait]
pub trait UrlCache: Send + Sync {
    /// Look up a code. `Ok(None)` is a miss.
    async fn get(&self, code: &str) -> Result<Option<String>>;

    /// Write an entry if absent (NX), with the given TTL. Returns whether
    /// the write took effect.
    async fn warm(&self, code: &str, url: &str, ttl: Duration) -> Result<bool>;
}

/// Cross-replica leadership via atomic set-if-absent with TTL.
#[async_trait]
pub trait LeaderLock: Send + Sync {
    /// Try to take leadership for one interval. Returns `false` when another
    /// replica already holds the lock. The lock is never released
    /// explicitly; TTL expiry is the release mechanism.
    async fn try_acquire(&self, ttl: Duration) -> Result<bool>;
}

/// Valkey client shared by both cache concerns. `ConnectionManager` handles
/// reconnects and is cheap to clone per operation.
#[derive(Clone)]
pub struct ValkeyCache {
    connection: ConnectionManager,
}

impl ValkeyCache {
    pub async fn connect(addr: &str, password: Option<&str>) -> Result<Self> {
        let url = match password {
            Some(password) => format!("redis://:{password}@{addr}"),
            None => format!("redis://{addr}"),
        };
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection.clone();
        // SET key value NX EX <secs> replies OK on success, nil when the key
        // already exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}

#[async_trait]
impl UrlCache for ValkeyCache {
    async fn get(&self, code: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        let url: Option<String> = redis::cmd("GET").arg(code).query_async(&mut conn).await?;
        Ok(url)
    }

    async fn warm(&self, code: &str, url: &str, ttl: Duration) -> Result<bool> {
        self.set_nx_ex(code, url, ttl).await
    }
}

#[async_trait]
impl LeaderLock for ValkeyCache {
    async fn try_acquire(&self, ttl: Duration) -> Result<bool> {
        self.set_nx_ex(TOP_LOCK_KEY, TOP_LOCK_VALUE, ttl).await
    }
}
