use std::time::Instant;

use apalis::prelude::{Data, Error as ApalisError};
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::context::{DeleteWorkerContext, job_aborted, job_failed};
use crate::{
    application::repos::RepoError,
    domain::banners::{BannerId, DeleteTask},
};

const METRIC_DELETE_COMPLETED: &str = "pennant_delete_completed_total";
const METRIC_DELETE_RETRY: &str = "pennant_delete_retry_total";
const METRIC_DELETE_FAILED: &str = "pennant_delete_failed_total";
const METRIC_DELETE_MS: &str = "pennant_delete_task_ms";

#[derive(Debug, Error)]
pub enum DeleteJobError {
    #[error("banner {banner_id} still present after {attempts} delete attempts")]
    Exhausted { banner_id: BannerId, attempts: u32 },
    #[error("stopped while retrying the delete of banner {banner_id}")]
    Interrupted { banner_id: BannerId },
}

/// How a single task was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Deleted,
    /// The banner no longer existed; nothing left to do.
    AlreadyGone,
    /// Every attempt failed; the task is given up.
    Exhausted,
    /// Stop was raised between attempts; the task should be delivered again.
    Interrupted,
}

/// apalis entry point for the delete channel.
pub async fn process_delete_job(
    task: DeleteTask,
    ctx: Data<DeleteWorkerContext>,
) -> Result<(), ApalisError> {
    match delete_with_retry(&ctx, task).await {
        TaskOutcome::Deleted | TaskOutcome::AlreadyGone => Ok(()),
        TaskOutcome::Exhausted => Err(job_aborted(DeleteJobError::Exhausted {
            banner_id: task.banner_id,
            attempts: ctx.config.attempts(),
        })),
        TaskOutcome::Interrupted => Err(job_failed(DeleteJobError::Interrupted {
            banner_id: task.banner_id,
        })),
    }
}

/// Deletes the task's banner, retrying failures with a fixed pause.
///
/// A failing delete is called once plus `max_retries` more times. Raising
/// stop cuts the pause short and leaves the banner in place.
pub async fn delete_with_retry(ctx: &DeleteWorkerContext, task: DeleteTask) -> TaskOutcome {
    let started_at = Instant::now();
    let attempts = ctx.config.attempts();

    for attempt in 1..=attempts {
        match ctx.repo.delete_banner(task.banner_id).await {
            Ok(()) => {
                counter!(METRIC_DELETE_COMPLETED).increment(1);
                histogram!(METRIC_DELETE_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
                info!(
                    target: "pennant::application::jobs::delete",
                    banner_id = task.banner_id,
                    attempt,
                    "Banner deleted"
                );
                return TaskOutcome::Deleted;
            }
            Err(RepoError::NotFound) => {
                warn!(
                    target: "pennant::application::jobs::delete",
                    banner_id = task.banner_id,
                    attempt,
                    "Banner already gone; dropping delete task"
                );
                return TaskOutcome::AlreadyGone;
            }
            Err(err) => {
                warn!(
                    target: "pennant::application::jobs::delete",
                    banner_id = task.banner_id,
                    attempt,
                    attempts,
                    error = %err,
                    "Banner delete attempt failed"
                );

                if attempt == attempts {
                    break;
                }

                counter!(METRIC_DELETE_RETRY).increment(1);
                let mut stop = ctx.stop.clone();
                tokio::select! {
                    _ = stopped(&mut stop) => {
                        debug!(
                            target: "pennant::application::jobs::delete",
                            banner_id = task.banner_id,
                            "Stop raised during backoff; leaving task for redelivery"
                        );
                        return TaskOutcome::Interrupted;
                    }
                    _ = tokio::time::sleep(ctx.config.retry_interval) => {}
                }
            }
        }
    }

    counter!(METRIC_DELETE_FAILED).increment(1);
    error!(
        target: "pennant::application::jobs::delete",
        banner_id = task.banner_id,
        attempts,
        "Giving up on banner delete; task dropped"
    );
    TaskOutcome::Exhausted
}

/// Resolves once stop is raised. A dropped sender never stops anything.
async fn stopped(stop: &mut tokio::sync::watch::Receiver<bool>) {
    if stop.wait_for(|stopping| *stopping).await.is_err() {
        std::future::pending::<()>().await;
    }
}
