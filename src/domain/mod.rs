//! Domain layer types and invariants.

pub mod banners;
pub mod error;
pub mod roles;
