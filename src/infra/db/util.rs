use sqlx::error::DatabaseError;

use crate::application::repos::RepoError;

/// Postgres SQLSTATE classes the repositories care about.
mod sqlstate {
    pub const UNIQUE_VIOLATION: &str = "23505";
    pub const FOREIGN_KEY_VIOLATION: &str = "23503";
    pub const INVALID_TEXT_REPRESENTATION: &str = "22P02";
    pub const INTEGRITY_CLASS: &str = "23";
    pub const QUERY_CANCELED: &str = "57014";
}

pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::PoolTimedOut => RepoError::Timeout,
        sqlx::Error::Database(db) => map_database_error(db.as_ref()),
        other => RepoError::from_persistence(other),
    }
}

fn map_database_error(db: &dyn DatabaseError) -> RepoError {
    let code = db.code().unwrap_or_default();
    let message = db.message().to_string();

    match &*code {
        sqlstate::UNIQUE_VIOLATION => RepoError::Duplicate {
            constraint: db.constraint().unwrap_or("unknown").to_string(),
        },
        sqlstate::FOREIGN_KEY_VIOLATION | sqlstate::INVALID_TEXT_REPRESENTATION => {
            RepoError::InvalidInput { message }
        }
        sqlstate::QUERY_CANCELED => RepoError::Timeout,
        code if code.starts_with(sqlstate::INTEGRITY_CLASS) => RepoError::Integrity { message },
        _ => RepoError::Persistence(message),
    }
}
