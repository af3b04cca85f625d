//! Key-value cache capability and its in-process implementation.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use thiserror::Error;
use tokio::time::Instant;

use super::config::CacheConfig;
use crate::util::lock::mutex_lock;

const SOURCE: &str = "cache::store";
const METRIC_CACHE_EVICT: &str = "pennant_cache_evict_total";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("failed to encode cache entry: {0}")]
    Encode(String),
    #[error("failed to decode cache entry: {0}")]
    Decode(String),
}

/// String cache with per-entry expiry.
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn push(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// `Ok(None)` is a miss, expired entries included.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Bounded LRU cache living in process memory.
///
/// Expired entries are dropped lazily on lookup; capacity pressure evicts
/// the least recently used entry first.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, Entry>>,
}

impl MemoryCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(config.capacity_non_zero())),
        }
    }

    /// Number of stored entries, expired ones not yet collected included.
    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvCache for MemoryCache {
    async fn push(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };

        let evicted = mutex_lock(&self.entries, SOURCE, "push").push(key.to_string(), entry);
        if let Some((evicted_key, _)) = evicted
            && evicted_key != key
        {
            counter!(METRIC_CACHE_EVICT).increment(1);
        }

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "get");

        match entries.get(key) {
            None => return Ok(None),
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => {}
        }

        entries.pop(key);
        Ok(None)
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        mutex_lock(&self.entries, SOURCE, "remove").pop(key);
        Ok(())
    }
}
