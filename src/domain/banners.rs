//! Banner entities mirrored from persistent storage.
//!
//! A banner is an opaque JSON document addressed by a `(tag_id, feature_id)`
//! pair. Every banner owns at least one mapping row; all of its mappings
//! share the same feature and activity flag, only the tag fans out.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::domain::error::DomainError;

pub type BannerId = i64;
pub type FeatureId = i64;
pub type TagId = i64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Banner {
    pub id: BannerId,
    pub content: Value,
    pub is_active: bool,
    pub feature_id: FeatureId,
    pub tag_ids: Vec<TagId>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Banner {
    /// Whether a caller limited to active banners may see this one.
    pub fn visible_to(&self, only_active: bool) -> bool {
        !only_active || self.is_active
    }
}

/// Archived content snapshot, identified by `updated_at` within a banner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BannerVersion {
    pub banner_id: BannerId,
    pub content: Value,
    pub updated_at: OffsetDateTime,
}

/// Queue payload asking a worker to delete one banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteTask {
    pub banner_id: BannerId,
}

/// Which content a content-changing update writes into history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryPolicy {
    /// Snapshot the new content at the moment it is written.
    #[default]
    RecordNew,
    /// Snapshot the content being overwritten, so a restore acts as undo.
    RecordPrevious,
}

impl HistoryPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RecordNew => "record_new",
            Self::RecordPrevious => "record_previous",
        }
    }
}

/// Sorts and deduplicates tag ids, matching the order the store reports them in.
///
/// A banner without mappings cannot be addressed, so an empty set is rejected.
pub fn normalize_tag_ids(tag_ids: &[TagId]) -> Result<Vec<TagId>, DomainError> {
    let mut normalized = tag_ids.to_vec();
    normalized.sort_unstable();
    normalized.dedup();

    if normalized.is_empty() {
        return Err(DomainError::EmptyTags);
    }

    Ok(normalized)
}

/// Treats JSON `null` the same as absent content.
pub fn supplied_content(content: Option<Value>) -> Option<Value> {
    content.filter(|value| !value.is_null())
}
