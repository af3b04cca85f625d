//! Delete-task channel for banners.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tracing::debug;

use super::{QueueError, TaskBackend, memory};
use crate::domain::banners::DeleteTask;

/// Default channel name for banner deletion tasks.
pub const DEFAULT_DELETE_CHANNEL: &str = "banner_delete";

/// Publishes [`DeleteTask`]s on one fixed channel and hands the same
/// channel to the workers that consume it.
#[derive(Clone)]
pub struct BannerQueue {
    backend: TaskBackend,
    channel: Arc<str>,
    closed: Arc<AtomicBool>,
}

impl BannerQueue {
    pub fn new(backend: TaskBackend, channel: impl Into<Arc<str>>) -> Self {
        Self {
            backend,
            channel: channel.into(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn backend_kind(&self) -> &'static str {
        self.backend.kind()
    }

    pub async fn publish(&self, task: DeleteTask) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }

        match &self.backend {
            TaskBackend::Postgres(tasks) => {
                let job_id = tasks
                    .push(&self.channel, task)
                    .await
                    .map_err(QueueError::backend)?;
                debug!(
                    target: "pennant::queue::banner",
                    job_id = %job_id,
                    banner_id = task.banner_id,
                    "Delete task stored"
                );
                Ok(())
            }
            TaskBackend::Memory(storage) => memory::push(storage, task).await,
        }
    }

    /// The storage workers poll for this channel's tasks.
    pub fn consume(&self) -> TaskBackend {
        self.backend.clone()
    }

    /// Rejects further publishes. Tasks already stored stay where they are.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
