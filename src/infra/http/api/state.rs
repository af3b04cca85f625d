use std::sync::Arc;

use crate::application::auth::TokenService;
use crate::application::banners::BannerService;
use crate::infra::db::PostgresRepositories;

#[derive(Clone)]
pub struct ApiState {
    pub banners: Arc<BannerService>,
    pub tokens: Arc<TokenService>,
    /// Checked by `/health`; absent when the store is not Postgres-backed.
    pub db: Option<Arc<PostgresRepositories>>,
}
