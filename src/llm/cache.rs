//! Response cache for repeated expert prompts.
//!
//! The cache is an injected, best-effort accelerator: the round executor
//! reads through it and ignores every [`CacheError`]. Keys hash the full
//! request identity (provider, model, system prompt and user prompt), so a
//! hit is only possible for a byte-identical prompt.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::litellm::Usage;
use super::registry::ProviderKind;
use crate::error::CacheError;

/// Hex-encoded SHA-256 cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash arbitrary content.
    pub fn from_content(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Hash the identity of one expert request.
    ///
    /// Fields are length-prefixed so that moving text between the system and
    /// user prompt cannot produce the same key.
    pub fn for_request(provider: ProviderKind, model: &str, system: &str, user: &str) -> Self {
        let mut hasher = Sha256::new();
        for part in [provider.as_str(), model, system, user] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A cached completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedCompletion {
    pub text: String,
    pub model: String,
    pub usage: Usage,
}

/// Pluggable response cache.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &ContentHash) -> Result<Option<CachedCompletion>, CacheError>;

    async fn set(
        &self,
        key: &ContentHash,
        value: &CachedCompletion,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    async fn invalidate(&self, key: &ContentHash) -> Result<(), CacheError>;
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries_added: u64,
    pub entries_evicted: u64,
}

impl CacheStats {
    /// Hit rate in [0, 1], or 0 if the cache was never read.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CachedCompletion,
    expires_at: Instant,
    last_accessed: Instant,
}

struct CacheState {
    entries: HashMap<ContentHash, CacheEntry>,
    stats: CacheStats,
}

/// Process-local cache with TTL and least-recently-used eviction.
pub struct InMemoryResponseCache {
    state: Mutex<CacheState>,
    max_entries: usize,
}

impl InMemoryResponseCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            }),
            max_entries: max_entries.max(1),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryResponseCache {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl ResponseCache for InMemoryResponseCache {
    async fn get(&self, key: &ContentHash) -> Result<Option<CachedCompletion>, CacheError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let now = Instant::now();

        let expired = matches!(state.entries.get(key), Some(e) if e.expires_at <= now);
        if expired {
            state.entries.remove(key);
            state.stats.entries_evicted += 1;
        }

        let hit = state.entries.get_mut(key).map(|entry| {
            entry.last_accessed = now;
            entry.value.clone()
        });

        if hit.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        Ok(hit)
    }

    async fn set(
        &self,
        key: &ContentHash,
        value: &CachedCompletion,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let now = Instant::now();

        let before = state.entries.len();
        state.entries.retain(|_, e| e.expires_at > now);
        let mut evicted = (before - state.entries.len()) as u64;

        if !state.entries.contains_key(key) && state.entries.len() >= self.max_entries {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                state.entries.remove(&oldest);
                evicted += 1;
            }
        }

        state.entries.insert(
            key.clone(),
            CacheEntry {
                value: value.clone(),
                expires_at: now + ttl,
                last_accessed: now,
            },
        );
        state.stats.entries_added += 1;
        state.stats.entries_evicted += evicted;
        Ok(())
    }

    async fn invalidate(&self, key: &ContentHash) -> Result<(), CacheError> {
        self.state.lock().entries.remove(key);
        Ok(())
    }
}

/// Redis-backed cache shared between engine processes.
pub struct RedisResponseCache {
    redis: ConnectionManager,
    prefix: String,
}

impl RedisResponseCache {
    /// Connect to Redis.
    pub async fn connect(redis_url: &str, prefix: &str) -> Result<Self, CacheError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| CacheError::Unavailable(e.to_string()))?;
        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        Ok(Self::from_connection(redis, prefix))
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(redis: ConnectionManager, prefix: &str) -> Self {
        Self {
            redis,
            prefix: prefix.to_string(),
        }
    }

    fn key(&self, key: &ContentHash) -> String {
        format!("{}:response:{}", self.prefix, key)
    }
}

#[async_trait]
impl ResponseCache for RedisResponseCache {
    async fn get(&self, key: &ContentHash) -> Result<Option<CachedCompletion>, CacheError> {
        let mut conn = self.redis.clone();
        let data: Option<String> = conn.get(self.key(key)).await?;
        data.map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(CacheError::from)
    }

    async fn set(
        &self,
        key: &ContentHash,
        value: &CachedCompletion,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        let data = serde_json::to_string(value)?;
        redis::cmd("SET")
            .arg(self.key(key))
            .arg(data)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn invalidate(&self, key: &ContentHash) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(self.key(key)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(text: &str) -> CachedCompletion {
        CachedCompletion {
            text: text.to_string(),
            model: "m".to_string(),
            usage: Usage::new(10, 5),
        }
    }

    #[test]
    fn test_request_hash_separates_fields() {
        let a = ContentHash::for_request(ProviderKind::OpenRouter, "m", "ab", "c");
        let b = ContentHash::for_request(ProviderKind::OpenRouter, "m", "a", "bc");
        let c = ContentHash::for_request(ProviderKind::LiteLlm, "m", "ab", "c");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(
            a,
            ContentHash::for_request(ProviderKind::OpenRouter, "m", "ab", "c")
        );
        assert_eq!(a.as_str().len(), 64);
    }

    #[tokio::test]
    async fn test_get_set_invalidate() {
        let cache = InMemoryResponseCache::new(10);
        let key = ContentHash::from_content("k");

        assert_eq!(cache.get(&key).await.expect("get"), None);
        cache
            .set(&key, &completion("v"), Duration::from_secs(60))
            .await
            .expect("set");
        assert_eq!(cache.get(&key).await.expect("get"), Some(completion("v")));

        cache.invalidate(&key).await.expect("invalidate");
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_expired_entries_are_misses() {
        let cache = InMemoryResponseCache::new(10);
        let key = ContentHash::from_content("k");
        cache
            .set(&key, &completion("v"), Duration::ZERO)
            .await
            .expect("set");
        assert_eq!(cache.get(&key).await.expect("get"), None);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = InMemoryResponseCache::new(2);
        let k1 = ContentHash::from_content("1");
        let k2 = ContentHash::from_content("2");
        let k3 = ContentHash::from_content("3");
        let ttl = Duration::from_secs(60);

        cache.set(&k1, &completion("1"), ttl).await.expect("set");
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.set(&k2, &completion("2"), ttl).await.expect("set");
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.get(&k1).await.expect("get");
        cache.set(&k3, &completion("3"), ttl).await.expect("set");

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&k2).await.expect("get").is_none());
        assert!(cache.get(&k1).await.expect("get").is_some());
    }
}
