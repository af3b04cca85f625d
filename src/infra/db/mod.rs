//! Postgres-backed repositories and delete-task storage.

mod banners;
mod jobs;
mod util;

pub use jobs::{MAX_DELIVERIES, PostgresTasks};
pub use util::map_sqlx_error;

use std::sync::Arc;

use apalis_sql::postgres::PostgresStorage;
use sqlx::{
    Postgres, Transaction,
    postgres::{PgPool, PgPoolOptions},
    query,
};

use crate::domain::banners::HistoryPolicy;

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
    history_policy: HistoryPolicy,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            history_policy: HistoryPolicy::default(),
        }
    }

    pub fn with_history_policy(mut self, policy: HistoryPolicy) -> Self {
        self.history_policy = policy;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn history_policy(&self) -> HistoryPolicy {
        self.history_policy
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }

    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: std::time::Duration,
    ) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
    }

    /// Applies the apalis job schema, then the banner schema.
    ///
    /// Both migrators share `_sqlx_migrations`, so each one ignores the
    /// versions the other has applied.
    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
        let mut jobs = PostgresStorage::migrations();
        jobs.set_ignore_missing(true);
        jobs.run(pool).await?;

        let mut banners = sqlx::migrate!("./migrations");
        banners.set_ignore_missing(true);
        banners.run(pool).await
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}
