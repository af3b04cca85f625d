//! Bounded background pool writing read results into the cache.
//!
//! Reads never wait on the cache write: [`CachePopulator::schedule`] hands the
//! banner to a fixed set of workers through a bounded channel and returns. A
//! full channel drops the request; failures are logged and otherwise ignored,
//! so the cache can lag the store until entries expire.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::banner::BannerCache;
use super::config::CacheConfig;
use crate::domain::banners::Banner;
use crate::util::lock::mutex_lock;

const SOURCE: &str = "cache::populate";
const METRIC_POPULATE_DROPPED: &str = "pennant_cache_populate_dropped_total";
const METRIC_POPULATE_FAILED: &str = "pennant_cache_populate_failed_total";
const METRIC_POPULATE_QUEUE_LEN: &str = "pennant_cache_populate_queue_len";

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Banner>>>;

pub struct CachePopulator {
    sender: Mutex<Option<mpsc::Sender<Banner>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl CachePopulator {
    /// Starts the workers on the current tokio runtime.
    pub fn spawn(cache: BannerCache, config: &CacheConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.populate_queue_limit_at_least_one());
        let receiver: SharedReceiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let ttl = config.ttl();

        let workers = (0..config.populate_workers_at_least_one())
            .map(|worker| {
                let cache = cache.clone();
                let receiver = Arc::clone(&receiver);
                tokio::spawn(run_worker(worker, cache, receiver, ttl))
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    /// Queues the banner for caching without waiting.
    pub fn schedule(&self, banner: Banner) {
        let guard = mutex_lock(&self.sender, SOURCE, "schedule");
        let Some(sender) = guard.as_ref() else {
            debug!(
                target: "pennant::cache::populate",
                banner_id = banner.id,
                "Populate pool stopped; skipping cache write"
            );
            return;
        };

        match sender.try_send(banner) {
            Ok(()) => {
                let pending = sender.max_capacity() - sender.capacity();
                gauge!(METRIC_POPULATE_QUEUE_LEN).set(pending as f64);
            }
            Err(TrySendError::Full(banner)) => {
                counter!(METRIC_POPULATE_DROPPED).increment(1);
                debug!(
                    target: "pennant::cache::populate",
                    banner_id = banner.id,
                    "Populate queue full; dropping cache write"
                );
            }
            Err(TrySendError::Closed(banner)) => {
                debug!(
                    target: "pennant::cache::populate",
                    banner_id = banner.id,
                    "Populate workers gone; dropping cache write"
                );
            }
        }
    }

    /// Stops accepting work and waits for queued writes to drain.
    pub async fn shutdown(&self) {
        mutex_lock(&self.sender, SOURCE, "shutdown").take();
        let workers = std::mem::take(&mut *mutex_lock(&self.workers, SOURCE, "shutdown"));

        for worker in futures::future::join_all(workers).await {
            if let Err(err) = worker {
                warn!(
                    target: "pennant::cache::populate",
                    error = %err,
                    "Populate worker ended abnormally"
                );
            }
        }
    }
}

async fn run_worker(worker: usize, cache: BannerCache, receiver: SharedReceiver, ttl: Duration) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(banner) = next else {
            debug!(target: "pennant::cache::populate", worker, "Populate worker exiting");
            return;
        };

        if let Err(err) = cache.push(&banner, ttl).await {
            counter!(METRIC_POPULATE_FAILED).increment(1);
            warn!(
                target: "pennant::cache::populate",
                worker,
                banner_id = banner.id,
                error = %err,
                "Failed to populate banner cache"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryCache;
    use serde_json::json;
    use time::OffsetDateTime;

    fn banner(id: i64, tag_id: i64) -> Banner {
        Banner {
            id,
            content: json!({"id": id}),
            is_active: true,
            feature_id: 1,
            tag_ids: vec![tag_id],
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[tokio::test]
    async fn scheduled_banners_reach_the_cache() {
        let kv = Arc::new(MemoryCache::new(&CacheConfig::default()));
        let cache = BannerCache::new(kv.clone());
        let populator = CachePopulator::spawn(cache.clone(), &CacheConfig::default());

        populator.schedule(banner(1, 10));
        populator.schedule(banner(2, 20));
        populator.shutdown().await;

        assert_eq!(cache.get(10, 1).await.unwrap().map(|b| b.id), Some(1));
        assert_eq!(cache.get(20, 1).await.unwrap().map(|b| b.id), Some(2));
    }

    #[tokio::test]
    async fn schedule_after_shutdown_is_a_no_op() {
        let kv = Arc::new(MemoryCache::new(&CacheConfig::default()));
        let populator =
            CachePopulator::spawn(BannerCache::new(kv.clone()), &CacheConfig::default());

        populator.shutdown().await;
        populator.schedule(banner(1, 10));

        assert!(kv.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn full_queue_drops_instead_of_blocking() {
        let kv = Arc::new(MemoryCache::new(&CacheConfig::default()));
        let config = CacheConfig {
            populate_workers: 1,
            populate_queue_limit: 2,
            ..Default::default()
        };
        let populator = CachePopulator::spawn(BannerCache::new(kv.clone()), &config);

        // The single-threaded runtime cannot run the worker until we yield,
        // so only the first two fit.
        for id in 0..5 {
            populator.schedule(banner(id, id));
        }
        populator.shutdown().await;

        assert_eq!(kv.len(), 2);
    }
}
