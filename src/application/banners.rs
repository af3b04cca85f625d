//! Banner orchestration: role-aware reads through the cache, pass-through
//! management operations, and queued deletion.

use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::application::repos::{
    BannerListFilter, BannersRepo, BannersWriteRepo, CreateBannerParams, RepoError,
    UpdateBannerParams,
};
use crate::cache::{BannerCache, CachePopulator};
use crate::domain::banners::{
    Banner, BannerId, BannerVersion, DeleteTask, FeatureId, TagId, normalize_tag_ids,
    supplied_content,
};
use crate::domain::error::DomainError;
use crate::queue::{QueueError, banner::BannerQueue};

#[derive(Debug, Error)]
pub enum BannerServiceError {
    #[error("banner not found")]
    NotFound,
    #[error("banner mapping already exists (constraint `{constraint}`)")]
    Conflict { constraint: String },
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error(transparent)]
    Repo(RepoError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<RepoError> for BannerServiceError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => Self::NotFound,
            RepoError::Duplicate { constraint } => Self::Conflict { constraint },
            other => Self::Repo(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateBannerCommand {
    pub tag_ids: Vec<TagId>,
    pub feature_id: FeatureId,
    pub content: Option<serde_json::Value>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateBannerCommand {
    pub tag_ids: Option<Vec<TagId>>,
    pub feature_id: Option<FeatureId>,
    pub content: Option<serde_json::Value>,
    pub is_active: Option<bool>,
}

/// Cache plus the pool that fills it after store reads.
#[derive(Clone)]
struct ReadCache {
    cache: BannerCache,
    populator: Arc<CachePopulator>,
}

#[derive(Clone)]
pub struct BannerService {
    reader: Arc<dyn BannersRepo>,
    writer: Arc<dyn BannersWriteRepo>,
    queue: BannerQueue,
    read_cache: Option<ReadCache>,
}

impl BannerService {
    /// A service without a read cache; every lookup goes to the store.
    pub fn new(
        reader: Arc<dyn BannersRepo>,
        writer: Arc<dyn BannersWriteRepo>,
        queue: BannerQueue,
    ) -> Self {
        Self {
            reader,
            writer,
            queue,
            read_cache: None,
        }
    }

    pub fn with_cache(mut self, cache: BannerCache, populator: Arc<CachePopulator>) -> Self {
        self.read_cache = Some(ReadCache { cache, populator });
        self
    }

    /// Resolves the banner shown for `(tag_id, feature_id)`.
    ///
    /// `use_last_revision` skips the cache. Cached banners are stored
    /// unfiltered, so an inactive hit is treated as a miss when
    /// `only_active` is set and the store decides.
    pub async fn get_banner(
        &self,
        tag_id: TagId,
        feature_id: FeatureId,
        use_last_revision: bool,
        only_active: bool,
    ) -> Result<Banner, BannerServiceError> {
        if !use_last_revision && let Some(read_cache) = &self.read_cache {
            match read_cache.cache.get(tag_id, feature_id).await {
                Ok(Some(banner)) if banner.visible_to(only_active) => return Ok(banner),
                Ok(Some(banner)) => debug!(
                    target: "pennant::application::banners",
                    banner_id = banner.id,
                    tag_id,
                    feature_id,
                    "Cached banner is inactive; asking the store"
                ),
                Ok(None) => {}
                Err(err) => warn!(
                    target: "pennant::application::banners",
                    tag_id,
                    feature_id,
                    error = %err,
                    "Cache lookup failed; asking the store"
                ),
            }
        }

        let banner = self
            .reader
            .get_banner(tag_id, feature_id, only_active)
            .await?;

        if let Some(read_cache) = &self.read_cache {
            read_cache.populator.schedule(banner.clone());
        }

        Ok(banner)
    }

    pub async fn list_banners(
        &self,
        filter: BannerListFilter,
    ) -> Result<Vec<Banner>, BannerServiceError> {
        if filter.limit.is_some_and(|limit| limit < 0) {
            return Err(DomainError::NegativePaging { field: "limit" }.into());
        }
        if filter.offset.is_some_and(|offset| offset < 0) {
            return Err(DomainError::NegativePaging { field: "offset" }.into());
        }

        Ok(self.reader.list_banners(filter).await?)
    }

    pub async fn create_banner(
        &self,
        command: CreateBannerCommand,
    ) -> Result<BannerId, BannerServiceError> {
        let content = supplied_content(command.content).ok_or(DomainError::MissingContent)?;
        let tag_ids = normalize_tag_ids(&command.tag_ids)?;

        let id = self
            .writer
            .create_banner(CreateBannerParams {
                tag_ids,
                feature_id: command.feature_id,
                content,
                is_active: command.is_active,
            })
            .await?;

        info!(
            target: "pennant::application::banners",
            banner_id = id,
            feature_id = command.feature_id,
            "Banner created"
        );

        Ok(id)
    }

    /// Applies a partial update. An empty or absent `tag_ids` leaves the tags alone.
    pub async fn update_banner(
        &self,
        id: BannerId,
        command: UpdateBannerCommand,
    ) -> Result<(), BannerServiceError> {
        let tag_ids = match command.tag_ids {
            Some(tag_ids) if !tag_ids.is_empty() => normalize_tag_ids(&tag_ids)?,
            _ => Vec::new(),
        };

        self.writer
            .update_banner(UpdateBannerParams {
                id,
                tag_ids,
                feature_id: command.feature_id,
                content: supplied_content(command.content),
                is_active: command.is_active,
            })
            .await?;

        Ok(())
    }

    /// Checks the banner exists and queues its deletion.
    ///
    /// Returns as soon as the task is queued; a worker removes the rows later.
    pub async fn delete_banner(&self, id: BannerId) -> Result<(), BannerServiceError> {
        self.reader.get_banner_by_id(id).await?;

        self.queue.publish(DeleteTask { banner_id: id }).await?;

        info!(
            target: "pennant::application::banners",
            banner_id = id,
            channel = self.queue.channel(),
            "Banner deletion queued"
        );

        Ok(())
    }

    pub async fn list_banner_versions(
        &self,
        banner_id: BannerId,
    ) -> Result<Vec<BannerVersion>, BannerServiceError> {
        Ok(self.reader.list_banner_versions(banner_id).await?)
    }

    pub async fn restore_version(
        &self,
        banner_id: BannerId,
        updated_at: OffsetDateTime,
    ) -> Result<(), BannerServiceError> {
        self.writer.restore_version(banner_id, updated_at).await?;

        info!(
            target: "pennant::application::banners",
            banner_id,
            version = %updated_at,
            "Banner version restored"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_errors_keep_their_kind() {
        assert!(matches!(
            BannerServiceError::from(RepoError::NotFound),
            BannerServiceError::NotFound
        ));
        assert!(matches!(
            BannerServiceError::from(RepoError::Duplicate {
                constraint: "banner_mappings_tag_feature_key".into()
            }),
            BannerServiceError::Conflict { .. }
        ));
        assert!(matches!(
            BannerServiceError::from(RepoError::Timeout),
            BannerServiceError::Repo(RepoError::Timeout)
        ));
    }
}
