//! Banner-shaped view over a [`KvCache`].

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::keys::BannerKey;
use super::store::{CacheError, KvCache};
use crate::domain::banners::{Banner, BannerId, FeatureId, TagId};
use crate::util::time::{from_unix_micros, to_unix_micros};

const METRIC_CACHE_HIT: &str = "pennant_cache_hit_total";
const METRIC_CACHE_MISS: &str = "pennant_cache_miss_total";

/// Wire shape of a cached banner. Timestamps are unix microseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CachedBanner {
    id: BannerId,
    content: Value,
    is_active: bool,
    feature_id: FeatureId,
    tag_ids: Vec<TagId>,
    created_at: i64,
    updated_at: i64,
}

pub fn encode_banner(banner: &Banner) -> Result<String, CacheError> {
    let cached = CachedBanner {
        id: banner.id,
        content: banner.content.clone(),
        is_active: banner.is_active,
        feature_id: banner.feature_id,
        tag_ids: banner.tag_ids.clone(),
        created_at: to_unix_micros(banner.created_at),
        updated_at: to_unix_micros(banner.updated_at),
    };
    serde_json::to_string(&cached).map_err(|err| CacheError::Encode(err.to_string()))
}

pub fn decode_banner(raw: &str) -> Result<Banner, CacheError> {
    let cached: CachedBanner =
        serde_json::from_str(raw).map_err(|err| CacheError::Decode(err.to_string()))?;
    let created_at =
        from_unix_micros(cached.created_at).map_err(|err| CacheError::Decode(err.to_string()))?;
    let updated_at =
        from_unix_micros(cached.updated_at).map_err(|err| CacheError::Decode(err.to_string()))?;

    Ok(Banner {
        id: cached.id,
        content: cached.content,
        is_active: cached.is_active,
        feature_id: cached.feature_id,
        tag_ids: cached.tag_ids,
        created_at,
        updated_at,
    })
}

/// Stores whole banners, one entry per `(tag, feature)` mapping.
///
/// The banner is cached as the store returned it, `is_active` included;
/// role filtering happens after lookup.
#[derive(Clone)]
pub struct BannerCache {
    kv: Arc<dyn KvCache>,
}

impl BannerCache {
    pub fn new(kv: Arc<dyn KvCache>) -> Self {
        Self { kv }
    }

    /// Writes the banner under every tag it is mapped to, each entry with its own TTL.
    pub async fn push(&self, banner: &Banner, ttl: Duration) -> Result<(), CacheError> {
        let encoded = encode_banner(banner)?;

        for tag_id in &banner.tag_ids {
            let key = BannerKey::new(*tag_id, banner.feature_id).to_string();
            self.kv.push(&key, encoded.clone(), ttl).await?;
        }

        Ok(())
    }

    /// `Ok(None)` on a miss. Undecodable entries are removed and reported as a miss.
    pub async fn get(
        &self,
        tag_id: TagId,
        feature_id: FeatureId,
    ) -> Result<Option<Banner>, CacheError> {
        let key = BannerKey::new(tag_id, feature_id).to_string();

        let Some(raw) = self.kv.get(&key).await? else {
            counter!(METRIC_CACHE_MISS).increment(1);
            return Ok(None);
        };

        match decode_banner(&raw) {
            Ok(banner) => {
                counter!(METRIC_CACHE_HIT).increment(1);
                Ok(Some(banner))
            }
            Err(err) => {
                warn!(
                    target: "pennant::cache::banner",
                    key = %key,
                    error = %err,
                    "Dropping undecodable cache entry"
                );
                counter!(METRIC_CACHE_MISS).increment(1);
                self.kv.remove(&key).await?;
                Ok(None)
            }
        }
    }
}
