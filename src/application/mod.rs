//! Application services coordinating the domain with its adapters.

pub mod auth;
pub mod banners;
pub mod error;
pub mod jobs;
pub mod repos;
