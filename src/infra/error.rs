use thiserror::Error;

/// Failures raised while wiring or running infrastructure adapters.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("database unavailable: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("failed to install tracing subscriber: {0}")]
    Telemetry(String),
    #[error(
        "database url is not configured (provide --database-url or set PENNANT__DATABASE__URL)"
    )]
    MissingDatabaseUrl,
}
