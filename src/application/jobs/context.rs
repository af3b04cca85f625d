use std::sync::Arc;
use std::time::Duration;

use apalis::prelude::Error as ApalisError;
use tokio::sync::watch;

use crate::application::repos::BannersWriteRepo;

const DEFAULT_WORKERS: usize = 1;
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_RESTART_COOLDOWN: Duration = Duration::from_secs(5);

/// Tuning for the delete workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteWorkerConfig {
    /// Tasks processed concurrently.
    pub workers: usize,
    /// Retries after the first failed delete of a task.
    pub max_retries: u32,
    /// Pause between two attempts on the same task.
    pub retry_interval: Duration,
    /// Pause before a stopped job monitor is started again.
    pub restart_cooldown: Duration,
}

impl DeleteWorkerConfig {
    /// Delete calls a task gets before it is given up, the first one included.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for DeleteWorkerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            restart_cooldown: DEFAULT_RESTART_COOLDOWN,
        }
    }
}

impl From<&crate::config::DeleteWorkerSettings> for DeleteWorkerConfig {
    fn from(settings: &crate::config::DeleteWorkerSettings) -> Self {
        Self {
            workers: settings.workers,
            max_retries: settings.max_retries,
            retry_interval: settings.retry_interval,
            restart_cooldown: settings.restart_cooldown,
        }
    }
}

/// Shared context handed to every delete job.
#[derive(Clone)]
pub struct DeleteWorkerContext {
    pub repo: Arc<dyn BannersWriteRepo>,
    pub config: DeleteWorkerConfig,
    /// Flips to `true` when the workers are asked to stop.
    pub stop: watch::Receiver<bool>,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The job failed and apalis may deliver it again.
pub fn job_failed<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Failed(Arc::new(boxed))
}

/// The job failed for good; apalis must not deliver it again.
pub fn job_aborted<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Abort(Arc::new(boxed))
}
