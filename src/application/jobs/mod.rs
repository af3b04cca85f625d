//! Asynchronous banner deletion.
//!
//! [`BannerService::delete_banner`](crate::application::banners::BannerService::delete_banner)
//! only queues a [`DeleteTask`](crate::domain::banners::DeleteTask); apalis
//! workers here consume those tasks and remove the rows. Each task is
//! retried locally with a fixed pause. A task interrupted by shutdown is
//! reported as failed so apalis delivers it again; an exhausted one is
//! aborted.

mod context;
mod delete;
mod workers;

pub use context::{DeleteWorkerConfig, DeleteWorkerContext, job_aborted, job_failed};
pub use delete::{DeleteJobError, TaskOutcome, delete_with_retry, process_delete_job};
pub use workers::DeleteWorkers;
