//! Banner resolution service: role-aware cached reads, versioned content
//! history, and asynchronous retryable deletion.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod queue;
pub mod util;
