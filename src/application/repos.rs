//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::banners::{Banner, BannerId, BannerVersion, FeatureId, TagId};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

/// Optional narrowing applied by [`BannersRepo::list_banners`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BannerListFilter {
    pub feature_id: Option<FeatureId>,
    pub tag_id: Option<TagId>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct CreateBannerParams {
    pub tag_ids: Vec<TagId>,
    pub feature_id: FeatureId,
    pub content: Value,
    pub is_active: bool,
}

/// Partial update; `None` (or an empty `tag_ids`) leaves that part untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateBannerParams {
    pub id: BannerId,
    pub tag_ids: Vec<TagId>,
    pub feature_id: Option<FeatureId>,
    pub content: Option<Value>,
    pub is_active: Option<bool>,
}

impl UpdateBannerParams {
    pub fn touches_mappings(&self) -> bool {
        !self.tag_ids.is_empty() || self.feature_id.is_some() || self.is_active.is_some()
    }
}

#[async_trait]
pub trait BannersRepo: Send + Sync {
    /// Looks up the banner mapped to `(tag_id, feature_id)`, with all of its tags.
    async fn get_banner(
        &self,
        tag_id: TagId,
        feature_id: FeatureId,
        only_active: bool,
    ) -> Result<Banner, RepoError>;

    async fn get_banner_by_id(&self, id: BannerId) -> Result<Banner, RepoError>;

    /// Banners ordered by id ascending.
    async fn list_banners(&self, filter: BannerListFilter) -> Result<Vec<Banner>, RepoError>;

    /// Versions ordered by `updated_at` descending.
    async fn list_banner_versions(
        &self,
        banner_id: BannerId,
    ) -> Result<Vec<BannerVersion>, RepoError>;
}

#[async_trait]
pub trait BannersWriteRepo: Send + Sync {
    async fn create_banner(&self, params: CreateBannerParams) -> Result<BannerId, RepoError>;

    async fn update_banner(&self, params: UpdateBannerParams) -> Result<(), RepoError>;

    async fn delete_banner(&self, id: BannerId) -> Result<(), RepoError>;

    /// Consumes the history row and writes its content back to the banner.
    async fn restore_version(
        &self,
        banner_id: BannerId,
        updated_at: OffsetDateTime,
    ) -> Result<(), RepoError>;
}
