//! In-process task storage.

use apalis::prelude::{MemoryStorage, MessageQueue};

use super::QueueError;
use crate::domain::banners::DeleteTask;

pub fn storage() -> MemoryStorage<DeleteTask> {
    MemoryStorage::new()
}

pub async fn push(storage: &MemoryStorage<DeleteTask>, task: DeleteTask) -> Result<(), QueueError> {
    let mut storage = storage.clone();
    storage
        .enqueue(task)
        .await
        .map_err(|_| QueueError::Backend("memory storage rejected the task".to_string()))
}
