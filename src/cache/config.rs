//! Cache configuration.
//!
//! Controls the banner read cache and its population pool via `pennant.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_TTL_SECONDS: u64 = 300;
const DEFAULT_CAPACITY: usize = 10_000;
const DEFAULT_POPULATE_WORKERS: usize = 2;
const DEFAULT_POPULATE_QUEUE_LIMIT: usize = 1_024;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve reads from the cache at all. When off, every read hits the store.
    pub enabled: bool,
    /// Lifetime of each cached entry.
    pub ttl_seconds: u64,
    /// Maximum number of `(tag, feature)` entries kept in memory.
    pub capacity: usize,
    /// Background tasks writing read results into the cache.
    pub populate_workers: usize,
    /// Pending population requests before new ones are dropped.
    pub populate_queue_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: DEFAULT_TTL_SECONDS,
            capacity: DEFAULT_CAPACITY,
            populate_workers: DEFAULT_POPULATE_WORKERS,
            populate_queue_limit: DEFAULT_POPULATE_QUEUE_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            ttl_seconds: settings.ttl.as_secs(),
            capacity: settings.capacity,
            populate_workers: settings.populate_workers,
            populate_queue_limit: settings.populate_queue_limit,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Returns the capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
    }

    /// At least one worker always drains the populate queue.
    pub fn populate_workers_at_least_one(&self) -> usize {
        self.populate_workers.max(1)
    }

    pub fn populate_queue_limit_at_least_one(&self) -> usize {
        self.populate_queue_limit.max(1)
    }
}
