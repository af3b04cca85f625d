#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use pennant::application::auth::TokenService;
use pennant::application::banners::BannerService;
use pennant::application::repos::{
    BannerListFilter, BannersRepo, BannersWriteRepo, CreateBannerParams, RepoError,
    UpdateBannerParams,
};
use pennant::cache::{BannerCache, CacheConfig, CachePopulator, KvCache, MemoryCache};
use pennant::domain::banners::{
    Banner, BannerId, BannerVersion, DeleteTask, FeatureId, HistoryPolicy, TagId,
};
use apalis::prelude::{MemoryStorage, MessageQueue};

use pennant::queue::{TaskBackend, banner::BannerQueue, memory};
use pennant::util::time::{from_unix_micros, to_unix_micros};

pub const MAPPING_CONSTRAINT: &str = "banner_mappings_tag_id_feature_id_key";
pub const TEST_SECRET: &str = "pennant-test-secret";

#[derive(Default)]
struct StoreState {
    next_id: BannerId,
    banners: BTreeMap<BannerId, Banner>,
    history: Vec<BannerVersion>,
    last_stamp: i64,
}

impl StoreState {
    /// Strictly increasing timestamps at microsecond precision.
    fn stamp(&mut self) -> OffsetDateTime {
        let now = to_unix_micros(OffsetDateTime::now_utc()).max(self.last_stamp + 1);
        self.last_stamp = now;
        from_unix_micros(now).expect("timestamp in range")
    }

    fn mapping_taken(&self, tag_id: TagId, feature_id: FeatureId, except: BannerId) -> bool {
        self.banners.values().any(|banner| {
            banner.id != except && banner.feature_id == feature_id && banner.tag_ids.contains(&tag_id)
        })
    }
}

/// In-process stand-in for the Postgres store with the same observable semantics.
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    policy: HistoryPolicy,
    pub get_banner_calls: AtomicUsize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_policy(HistoryPolicy::RecordNew)
    }
}

impl InMemoryStore {
    pub fn with_policy(policy: HistoryPolicy) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            policy,
            get_banner_calls: AtomicUsize::new(0),
        }
    }

    pub async fn banner_count(&self) -> usize {
        self.state.lock().await.banners.len()
    }

    pub async fn contains(&self, id: BannerId) -> bool {
        self.state.lock().await.banners.contains_key(&id)
    }

    pub fn store_reads(&self) -> usize {
        self.get_banner_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BannersRepo for InMemoryStore {
    async fn get_banner(
        &self,
        tag_id: TagId,
        feature_id: FeatureId,
        only_active: bool,
    ) -> Result<Banner, RepoError> {
        self.get_banner_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().await;
        state
            .banners
            .values()
            .find(|banner| {
                banner.feature_id == feature_id
                    && banner.tag_ids.contains(&tag_id)
                    && banner.visible_to(only_active)
            })
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn get_banner_by_id(&self, id: BannerId) -> Result<Banner, RepoError> {
        let state = self.state.lock().await;
        state.banners.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn list_banners(&self, filter: BannerListFilter) -> Result<Vec<Banner>, RepoError> {
        let state = self.state.lock().await;
        let offset = filter.offset.unwrap_or(0) as usize;
        let limit = filter.limit.map(|limit| limit as usize).unwrap_or(usize::MAX);

        Ok(state
            .banners
            .values()
            .filter(|banner| filter.feature_id.is_none_or(|id| banner.feature_id == id))
            .filter(|banner| filter.tag_id.is_none_or(|id| banner.tag_ids.contains(&id)))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_banner_versions(
        &self,
        banner_id: BannerId,
    ) -> Result<Vec<BannerVersion>, RepoError> {
        let state = self.state.lock().await;
        let mut versions: Vec<BannerVersion> = state
            .history
            .iter()
            .filter(|version| version.banner_id == banner_id)
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(versions)
    }
}

#[async_trait]
impl BannersWriteRepo for InMemoryStore {
    async fn create_banner(&self, params: CreateBannerParams) -> Result<BannerId, RepoError> {
        let mut state = self.state.lock().await;

        if params
            .tag_ids
            .iter()
            .any(|tag_id| state.mapping_taken(*tag_id, params.feature_id, 0))
        {
            return Err(RepoError::Duplicate {
                constraint: MAPPING_CONSTRAINT.to_string(),
            });
        }

        state.next_id += 1;
        let id = state.next_id;
        let now = state.stamp();
        state.banners.insert(
            id,
            Banner {
                id,
                content: params.content,
                is_active: params.is_active,
                feature_id: params.feature_id,
                tag_ids: params.tag_ids,
                created_at: now,
                updated_at: now,
            },
        );

        Ok(id)
    }

    async fn update_banner(&self, params: UpdateBannerParams) -> Result<(), RepoError> {
        let mut state = self.state.lock().await;
        let current = state
            .banners
            .get(&params.id)
            .cloned()
            .ok_or(RepoError::NotFound)?;

        let feature_id = params.feature_id.unwrap_or(current.feature_id);
        let tag_ids = if params.tag_ids.is_empty() {
            current.tag_ids.clone()
        } else {
            params.tag_ids.clone()
        };
        if tag_ids
            .iter()
            .any(|tag_id| state.mapping_taken(*tag_id, feature_id, params.id))
        {
            return Err(RepoError::Duplicate {
                constraint: MAPPING_CONSTRAINT.to_string(),
            });
        }

        let mut updated = current.clone();
        updated.feature_id = feature_id;
        updated.tag_ids = tag_ids;
        if let Some(is_active) = params.is_active {
            updated.is_active = is_active;
        }

        if let Some(content) = params.content.filter(|content| !content.is_null()) {
            let now = state.stamp();
            updated.content = content.clone();
            updated.updated_at = now;

            let snapshot = match self.policy {
                HistoryPolicy::RecordNew => BannerVersion {
                    banner_id: params.id,
                    content,
                    updated_at: now,
                },
                HistoryPolicy::RecordPrevious => BannerVersion {
                    banner_id: params.id,
                    content: current.content,
                    updated_at: current.updated_at,
                },
            };
            state.history.push(snapshot);
        }

        state.banners.insert(params.id, updated);
        Ok(())
    }

    async fn delete_banner(&self, id: BannerId) -> Result<(), RepoError> {
        let mut state = self.state.lock().await;
        state.banners.remove(&id).ok_or(RepoError::NotFound)?;
        state.history.retain(|version| version.banner_id != id);
        Ok(())
    }

    async fn restore_version(
        &self,
        banner_id: BannerId,
        updated_at: OffsetDateTime,
    ) -> Result<(), RepoError> {
        let mut state = self.state.lock().await;
        if !state.banners.contains_key(&banner_id) {
            return Err(RepoError::NotFound);
        }

        let position = state
            .history
            .iter()
            .position(|version| version.banner_id == banner_id && version.updated_at == updated_at)
            .ok_or(RepoError::NotFound)?;
        let version = state.history.remove(position);
        let now = state.stamp();

        if let Some(banner) = state.banners.get_mut(&banner_id) {
            banner.content = version.content;
            banner.updated_at = now;
        }

        Ok(())
    }
}

/// Delete side that fails a scripted number of times before delegating.
pub struct FlakyDeleter {
    inner: Arc<InMemoryStore>,
    failures: Mutex<VecDeque<RepoError>>,
    pub attempts: AtomicUsize,
}

impl FlakyDeleter {
    pub fn new(inner: Arc<InMemoryStore>, failures: Vec<RepoError>) -> Self {
        Self {
            inner,
            failures: Mutex::new(failures.into()),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn failing_forever(inner: Arc<InMemoryStore>) -> Self {
        let failures = (0..64).map(|_| RepoError::Timeout).collect();
        Self::new(inner, failures)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BannersWriteRepo for FlakyDeleter {
    async fn create_banner(&self, params: CreateBannerParams) -> Result<BannerId, RepoError> {
        self.inner.create_banner(params).await
    }

    async fn update_banner(&self, params: UpdateBannerParams) -> Result<(), RepoError> {
        self.inner.update_banner(params).await
    }

    async fn delete_banner(&self, id: BannerId) -> Result<(), RepoError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().await.pop_front() {
            return Err(err);
        }
        self.inner.delete_banner(id).await
    }

    async fn restore_version(
        &self,
        banner_id: BannerId,
        updated_at: OffsetDateTime,
    ) -> Result<(), RepoError> {
        self.inner.restore_version(banner_id, updated_at).await
    }
}

/// Service wired to in-memory adapters, with handles for assertions.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub tasks: MemoryStorage<DeleteTask>,
    pub banner_queue: BannerQueue,
    pub kv: Option<Arc<MemoryCache>>,
    pub populator: Option<Arc<CachePopulator>>,
    pub service: Arc<BannerService>,
}

impl Harness {
    pub fn without_cache() -> Self {
        Self::build(Arc::new(InMemoryStore::default()), None)
    }

    pub fn with_cache() -> Self {
        Self::build(Arc::new(InMemoryStore::default()), Some(cache_config()))
    }

    pub fn build(store: Arc<InMemoryStore>, cache: Option<CacheConfig>) -> Self {
        let tasks = memory::storage();
        let banner_queue = BannerQueue::new(TaskBackend::Memory(tasks.clone()), "banner_delete");

        let mut service = BannerService::new(store.clone(), store.clone(), banner_queue.clone());
        let (kv, populator) = match cache {
            Some(config) => {
                let kv = Arc::new(MemoryCache::new(&config));
                let dyn_kv: Arc<dyn KvCache> = kv.clone();
                let cache = BannerCache::new(dyn_kv);
                let populator = Arc::new(CachePopulator::spawn(cache.clone(), &config));
                service = service.with_cache(cache, populator.clone());
                (Some(kv), Some(populator))
            }
            None => (None, None),
        };

        Self {
            store,
            tasks,
            banner_queue,
            kv,
            populator,
            service: Arc::new(service),
        }
    }

    /// Takes the next queued delete task.
    pub async fn next_task(&self) -> DeleteTask {
        let mut tasks = self.tasks.clone();
        tokio::time::timeout(Duration::from_secs(5), tasks.dequeue())
            .await
            .expect("a task was queued")
            .expect("memory storage")
            .expect("task payload")
    }

    /// Asserts nothing is waiting in the delete queue.
    pub async fn assert_no_task(&self) {
        let mut tasks = self.tasks.clone();
        let next = tokio::time::timeout(Duration::from_millis(50), tasks.dequeue()).await;
        assert!(next.is_err(), "unexpected queued task");
    }

    /// Waits until every scheduled cache write has landed.
    pub async fn flush_cache(&self) {
        if let Some(populator) = &self.populator {
            populator.shutdown().await;
        }
    }

    pub fn cache(&self) -> BannerCache {
        let kv: Arc<dyn KvCache> = self.kv.clone().expect("cache enabled");
        BannerCache::new(kv)
    }

    /// Polls the cache until the populate pool has written `(tag_id, feature_id)`.
    pub async fn wait_cached(&self, tag_id: TagId, feature_id: FeatureId) -> Banner {
        let cache = self.cache();
        for _ in 0..200 {
            if let Ok(Some(banner)) = cache.get(tag_id, feature_id).await {
                return banner;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("banner ({tag_id}, {feature_id}) never reached the cache");
    }
}

pub fn cache_config() -> CacheConfig {
    CacheConfig {
        enabled: true,
        ttl_seconds: 300,
        capacity: 128,
        populate_workers: 1,
        populate_queue_limit: 64,
    }
}

pub fn token_service() -> TokenService {
    TokenService::new(TEST_SECRET, Duration::from_secs(3600))
}

pub fn json_content(value: i64) -> Value {
    serde_json::json!({ "title": "banner", "value": value })
}
