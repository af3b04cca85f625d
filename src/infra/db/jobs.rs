use std::time::Duration;

use apalis_sql::{Config as ApalisSqlConfig, postgres::PostgresStorage};
use sqlx::postgres::PgPool;

use crate::domain::banners::DeleteTask;

/// Deliveries a stored task gets before apalis marks it dead. Failed
/// deliveries only come from workers stopped mid-retry, so this is a
/// ceiling on restarts, not on delete attempts.
pub const MAX_DELIVERIES: i32 = 10;

/// Delete tasks kept in the `apalis.jobs` table.
#[derive(Clone)]
pub struct PostgresTasks {
    pool: PgPool,
    poll_interval: Duration,
    orphaned_after: Duration,
}

impl PostgresTasks {
    /// `orphaned_after` is how long a task may stay locked by a silent
    /// worker before it is handed to another one.
    pub fn new(pool: PgPool, poll_interval: Duration, orphaned_after: Duration) -> Self {
        Self {
            pool,
            poll_interval,
            orphaned_after,
        }
    }

    /// Stores `task` as a pending job of type `channel` and returns its id.
    pub async fn push(&self, channel: &str, task: DeleteTask) -> Result<String, sqlx::Error> {
        let payload = serde_json::to_value(task)
            .map_err(|err| sqlx::Error::Encode(Box::new(err)))?;

        sqlx::query_scalar::<_, String>(
            r#"
            SELECT (apalis.push_job($1, $2::json, 'Pending', now(), $3, 0)).id
            "#,
        )
        .bind(channel)
        .bind(payload)
        .bind(MAX_DELIVERIES)
        .fetch_one(&self.pool)
        .await
    }

    /// A fresh apalis storage polling `channel`.
    pub fn storage(&self, channel: &str) -> PostgresStorage<DeleteTask> {
        let config = ApalisSqlConfig::new(channel)
            .set_poll_interval(self.poll_interval)
            .set_reenqueue_orphaned_after(self.orphaned_after);
        PostgresStorage::new_with_config(self.pool.clone(), config)
    }
}
