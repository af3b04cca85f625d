//! Cache key derivation.

use std::fmt::{Display, Formatter};

use crate::domain::banners::{FeatureId, TagId};

const BANNER_PREFIX: &str = "banner";

/// Cache address of the banner mapped to one `(tag, feature)` pair.
///
/// Rendered as `banner:{tag_id}:{feature_id}`. Integers never contain the
/// delimiter, so distinct pairs always render to distinct keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BannerKey {
    pub tag_id: TagId,
    pub feature_id: FeatureId,
}

impl BannerKey {
    pub fn new(tag_id: TagId, feature_id: FeatureId) -> Self {
        Self { tag_id, feature_id }
    }
}

impl Display for BannerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{BANNER_PREFIX}:{}:{}", self.tag_id, self.feature_id)
    }
}
