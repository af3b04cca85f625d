use std::error::Error as StdError;

use axum::{http::StatusCode, response::Response};
use thiserror::Error;

use crate::{application::auth::AuthError, config::LoadError, infra::error::InfraError};

/// Diagnostic chain for a failed request.
///
/// Travels in the response extensions until the logging middleware takes it;
/// clients never see it.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub origin: &'static str,
    pub status: StatusCode,
    pub chain: Vec<String>,
}

impl ErrorReport {
    /// Records `error` and every error in its `source()` chain, outermost first.
    pub fn capture(
        origin: &'static str,
        status: StatusCode,
        error: &(dyn StdError + 'static),
    ) -> Self {
        let mut chain = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            chain.push(inner.to_string());
            current = inner.source();
        }
        Self {
            origin,
            status,
            chain,
        }
    }

    pub fn note(origin: &'static str, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            origin,
            status,
            chain: vec![message.into()],
        }
    }

    pub fn headline(&self) -> &str {
        self.chain
            .first()
            .map(String::as_str)
            .unwrap_or("no diagnostic available")
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Process-level failure surfaced from `main`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("auth secret is required (set auth.secret or PENNANT__AUTH__SECRET)")]
    MissingSecret,
    #[error("http server stopped: {0}")]
    Server(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Infra(err.into())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Infra(err.into())
    }
}
