use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::banners::{CreateBannerCommand, UpdateBannerCommand};
use crate::application::repos::BannerListFilter;
use crate::domain::banners::{Banner, BannerId, BannerVersion, FeatureId, TagId};
use crate::util::time::to_unix_micros;

#[derive(Debug, Deserialize)]
pub struct UserBannerQuery {
    pub tag_id: TagId,
    pub feature_id: FeatureId,
    #[serde(default)]
    pub use_last_revision: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct BannerListQuery {
    pub feature_id: Option<FeatureId>,
    pub tag_id: Option<TagId>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl From<BannerListQuery> for BannerListFilter {
    fn from(query: BannerListQuery) -> Self {
        Self {
            feature_id: query.feature_id,
            tag_id: query.tag_id,
            limit: query.limit,
            offset: query.offset,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BannerCreateRequest {
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    pub feature_id: Option<FeatureId>,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub is_active: bool,
}

impl BannerCreateRequest {
    /// Transport-level checks; returns the message sent back with a 400.
    pub fn into_command(self) -> Result<CreateBannerCommand, &'static str> {
        let feature_id = self.feature_id.ok_or("feature_id is required")?;
        if self.tag_ids.is_empty() {
            return Err("tag_ids array cannot be empty");
        }
        if self.content.as_ref().is_none_or(Value::is_null) {
            return Err("content cannot be null");
        }

        Ok(CreateBannerCommand {
            tag_ids: self.tag_ids,
            feature_id,
            content: self.content,
            is_active: self.is_active,
        })
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct BannerPatchRequest {
    #[serde(default)]
    pub tag_ids: Option<Vec<TagId>>,
    #[serde(default)]
    pub feature_id: Option<FeatureId>,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl From<BannerPatchRequest> for UpdateBannerCommand {
    fn from(request: BannerPatchRequest) -> Self {
        Self {
            tag_ids: request.tag_ids,
            feature_id: request.feature_id,
            content: request.content,
            is_active: request.is_active,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BannerCreatedResponse {
    pub banner_id: BannerId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BannerResponse {
    pub id: BannerId,
    pub content: Value,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub feature_id: FeatureId,
    pub tag_ids: Vec<TagId>,
}

impl From<Banner> for BannerResponse {
    fn from(banner: Banner) -> Self {
        Self {
            id: banner.id,
            content: banner.content,
            is_active: banner.is_active,
            created_at: to_unix_micros(banner.created_at),
            updated_at: to_unix_micros(banner.updated_at),
            feature_id: banner.feature_id,
            tag_ids: banner.tag_ids,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BannerVersionResponse {
    pub banner_id: BannerId,
    pub content: Value,
    pub updated_at: i64,
}

impl From<BannerVersion> for BannerVersionResponse {
    fn from(version: BannerVersion) -> Self {
        Self {
            banner_id: version.banner_id,
            content: version.content,
            updated_at: to_unix_micros(version.updated_at),
        }
    }
}
