//! Delete-task channel backed by apalis storages.
//!
//! Tasks are published onto a named channel and consumed by apalis workers
//! (see [`crate::application::jobs`]). The Postgres backend stores them as
//! rows of the `apalis.jobs` table, whose `job_type` is the channel name;
//! the memory backend keeps them in an in-process [`MemoryStorage`] and is
//! meant for tests and single-node experiments.
//!
//! # Configuration
//!
//! ```toml
//! [queue]
//! backend = "postgres"        # or "memory"
//! channel = "banner_delete"
//! visibility_timeout_seconds = 60
//! poll_interval_ms = 500
//! ```

pub mod banner;
pub mod memory;

use apalis::prelude::MemoryStorage;
use thiserror::Error;

use crate::{domain::banners::DeleteTask, infra::db::PostgresTasks};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,
    #[error("queue backend error: {0}")]
    Backend(String),
}

impl QueueError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Storage the delete tasks live in between publish and consume.
#[derive(Clone)]
pub enum TaskBackend {
    Postgres(PostgresTasks),
    Memory(MemoryStorage<DeleteTask>),
}

impl TaskBackend {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::Memory(_) => "memory",
        }
    }
}
