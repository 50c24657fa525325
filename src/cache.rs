use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::SearchResult;

/// Content address of a `(query, limit)` pair.
pub fn cache_key(query: &str, limit: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.trim().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(limit.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Store of prior query results. Writes for an existing key overwrite it.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<SearchResult>>;
    async fn put(&self, key: &str, results: &[SearchResult]);
}

#[derive(Debug, Clone)]
struct CacheEntry {
    created_at: Instant,
    results: Vec<SearchResult>,
}

/// Process-local cache. Expired entries are removed when read and swept on
/// every write.
pub struct MemoryCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<SearchResult>> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            None => return None,
            Some(entry) => entry.created_at.elapsed() >= self.ttl,
        };
        if expired {
            entries.remove(key);
            debug!(key, "cache entry expired");
            return None;
        }
        entries.get(key).map(|e| e.results.clone())
    }

    async fn put(&self, key: &str, results: &[SearchResult]) {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.created_at.elapsed() < self.ttl);
        if entries.len() < before {
            debug!(swept = before - entries.len(), "expired cache entries swept");
        }
        entries.insert(
            key.to_string(),
            CacheEntry {
                created_at: Instant::now(),
                results: results.to_vec(),
            },
        );
    }
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    created_at: chrono::DateTime<chrono::Utc>,
    results: Vec<SearchResult>,
}

/// Shared cache in Redis; expiry is delegated to `SETEX`.
#[derive(Clone)]
pub struct RedisCache {
    client: Client,
    ttl: Duration,
    prefix: String,
}

impl RedisCache {
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // Test connection
        let mut conn = client.get_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("✅ Redis result cache connected");

        Ok(Self {
            client,
            ttl,
            prefix: "serp:".to_string(),
        })
    }

    async fn try_get(&self, key: &str) -> Result<Option<Vec<SearchResult>>> {
        let mut conn = self.client.get_async_connection().await?;
        let raw: Option<String> = conn.get(format!("{}{}", self.prefix, key)).await?;
        match raw {
            Some(json) => {
                let entry: StoredEntry = serde_json::from_str(&json)?;
                Ok(Some(entry.results))
            }
            None => Ok(None),
        }
    }

    async fn try_put(&self, key: &str, results: &[SearchResult]) -> Result<()> {
        let mut conn = self.client.get_async_connection().await?;
        let entry = StoredEntry {
            created_at: chrono::Utc::now(),
            results: results.to_vec(),
        };
        let json = serde_json::to_string(&entry)?;
        redis::cmd("SETEX")
            .arg(format!("{}{}", self.prefix, key))
            .arg(self.ttl.as_secs().max(1))
            .arg(json)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ResultCache for RedisCache {
    async fn get(&self, key: &str) -> Option<Vec<SearchResult>> {
        match self.try_get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(error = %e, "redis cache read failed, treating as miss");
                None
            }
        }
    }

    async fn put(&self, key: &str, results: &[SearchResult]) {
        if let Err(e) = self.try_put(key, results).await {
            warn!(error = %e, "redis cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StrategyKind;

    fn result(link: &str) -> SearchResult {
        SearchResult {
            position: 1,
            title: "t".into(),
            link: link.into(),
            snippet: String::new(),
            origin: StrategyKind::DirectHttp,
        }
    }

    #[test]
    fn key_depends_on_query_and_limit() {
        assert_eq!(cache_key("sites like a.com", 10), cache_key("sites like a.com ", 10));
        assert_ne!(cache_key("sites like a.com", 10), cache_key("sites like a.com", 20));
        assert_ne!(cache_key("ab", 1), cache_key("a", 11));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_lazily_after_ttl() {
        let cache = MemoryCache::new(Duration::from_secs(3600));
        cache.put("k", &[result("https://a.io/x")]).await;

        tokio::time::advance(Duration::from_secs(3599)).await;
        assert!(cache.get("k").await.is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.len(), 1);
        assert!(cache.get("k").await.is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn writes_sweep_entries_nobody_reads_again() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        cache.put("stale-1", &[result("https://a.io/1")]).await;
        cache.put("stale-2", &[result("https://a.io/2")]).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        cache.put("fresh", &[result("https://b.io/1")]).await;

        assert_eq!(cache.len(), 1);
        assert!(cache.get("fresh").await.is_some());
    }

    #[tokio::test]
    async fn writes_overwrite_instead_of_merging() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        cache.put("k", &[result("https://a.io/1"), result("https://a.io/2")]).await;
        cache.put("k", &[result("https://b.io/1")]).await;
        let hit = cache.get("k").await.unwrap();
        assert_eq!(hit, vec![result("https://b.io/1")]);
    }
}
