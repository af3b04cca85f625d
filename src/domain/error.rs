use thiserror::Error;

/// A banner request that no store state could make valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("tag_ids must not be empty")]
    EmptyTags,
    #[error("content must not be null")]
    MissingContent,
    #[error("{field} must not be negative")]
    NegativePaging { field: &'static str },
}
