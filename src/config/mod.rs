//! Service settings. Sources are layered lowest first: `config/default`, `./pennant.*`,
//! `--config-file`, `PENNANT__*` environment variables, then command-line flags.

mod cli;

pub use cli::{
    CliArgs, Command, DatabaseOverride, IssueTokenArgs, MigrateArgs, ServeArgs, ServeOverrides,
    TokenRole,
};

use std::{net::SocketAddr, num::NonZeroU32, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::banners::HistoryPolicy;
use crate::queue::banner::DEFAULT_DELETE_CHANNEL;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pennant";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 10;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DB_ACQUIRE_TIMEOUT_SECS: u64 = 3;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_CAPACITY: usize = 10_000;
const DEFAULT_CACHE_POPULATE_WORKERS: usize = 2;
const DEFAULT_CACHE_POPULATE_QUEUE_LIMIT: usize = 1_024;
const DEFAULT_QUEUE_VISIBILITY_TIMEOUT_SECS: u64 = 60;
const DEFAULT_QUEUE_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_DELETE_WORKERS: usize = 1;
const DEFAULT_DELETE_MAX_RETRIES: u32 = 5;
const DEFAULT_DELETE_RETRY_INTERVAL_SECS: u64 = 5;
const DEFAULT_DELETE_RESTART_COOLDOWN_SECS: u64 = 5;
const DEFAULT_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

/// Validated settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub queue: QueueSettings,
    pub delete_workers: DeleteWorkerSettings,
    pub auth: AuthSettings,
    pub history: HistorySettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl: Duration,
    pub capacity: usize,
    pub populate_workers: usize,
    pub populate_queue_limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    Memory,
    Postgres,
}

impl FromStr for QueueBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            other => Err(format!("unknown queue backend `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub backend: QueueBackend,
    /// apalis job type the delete tasks are stored under.
    pub channel: String,
    /// How long a task may stay locked by an unresponsive worker before
    /// apalis hands it to another one.
    pub visibility_timeout: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct DeleteWorkerSettings {
    pub workers: usize,
    /// Retries after the first failed delete; a task gets `max_retries + 1` calls.
    pub max_retries: u32,
    pub retry_interval: Duration,
    pub restart_cooldown: Duration,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// HS256 signing secret. Required by `serve` and `issue-token`.
    pub secret: Option<String>,
    pub token_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct HistorySettings {
    pub policy: HistoryPolicy,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Merges every source for `cli` and validates the result.
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("PENNANT").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Migrate(args)) => raw.apply_database_override(&args.database),
        Some(Command::IssueToken(_)) => {}
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Parses the process arguments and loads settings for them.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    queue: RawQueueSettings,
    delete_workers: RawDeleteWorkerSettings,
    auth: RawAuthSettings,
    history: RawHistorySettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(ttl) = overrides.cache_ttl_seconds {
            self.cache.ttl_seconds = Some(ttl);
        }
        if let Some(backend) = overrides.queue_backend.as_ref() {
            self.queue.backend = Some(backend.clone());
        }
        if let Some(workers) = overrides.delete_workers {
            self.delete_workers.workers = Some(workers);
        }
        if let Some(policy) = overrides.history_policy.as_ref() {
            self.history.policy = Some(policy.clone());
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            cache,
            queue,
            delete_workers,
            auth,
            history,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let cache = build_cache_settings(cache)?;
        let delete_workers = build_delete_worker_settings(delete_workers)?;
        let queue = build_queue_settings(queue, &delete_workers)?;
        let auth = build_auth_settings(auth)?;
        let history = build_history_settings(history)?;

        Ok(Self {
            server,
            logging,
            database,
            cache,
            queue,
            delete_workers,
            auth,
            history,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr =
        parse_socket_addr(&host, port).map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    let acquire_timeout = positive_duration(
        database
            .acquire_timeout_seconds
            .unwrap_or(DEFAULT_DB_ACQUIRE_TIMEOUT_SECS),
        "database.acquire_timeout_seconds",
        Duration::from_secs,
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
        acquire_timeout,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl = positive_duration(
        cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS),
        "cache.ttl_seconds",
        Duration::from_secs,
    )?;

    let capacity = positive_usize(
        cache.capacity.unwrap_or(DEFAULT_CACHE_CAPACITY),
        "cache.capacity",
    )?;
    let populate_workers = positive_usize(
        cache
            .populate_workers
            .unwrap_or(DEFAULT_CACHE_POPULATE_WORKERS),
        "cache.populate_workers",
    )?;
    let populate_queue_limit = positive_usize(
        cache
            .populate_queue_limit
            .unwrap_or(DEFAULT_CACHE_POPULATE_QUEUE_LIMIT),
        "cache.populate_queue_limit",
    )?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        ttl,
        capacity,
        populate_workers,
        populate_queue_limit,
    })
}

fn build_delete_worker_settings(
    workers: RawDeleteWorkerSettings,
) -> Result<DeleteWorkerSettings, LoadError> {
    let count = positive_usize(
        workers.workers.unwrap_or(DEFAULT_DELETE_WORKERS),
        "delete_workers.workers",
    )?;

    let max_retries = workers.max_retries.unwrap_or(DEFAULT_DELETE_MAX_RETRIES);

    let retry_interval = positive_duration(
        workers
            .retry_interval_seconds
            .unwrap_or(DEFAULT_DELETE_RETRY_INTERVAL_SECS),
        "delete_workers.retry_interval_seconds",
        Duration::from_secs,
    )?;
    let restart_cooldown = positive_duration(
        workers
            .restart_cooldown_seconds
            .unwrap_or(DEFAULT_DELETE_RESTART_COOLDOWN_SECS),
        "delete_workers.restart_cooldown_seconds",
        Duration::from_secs,
    )?;

    Ok(DeleteWorkerSettings {
        workers: count,
        max_retries,
        retry_interval,
        restart_cooldown,
    })
}

fn build_queue_settings(
    queue: RawQueueSettings,
    workers: &DeleteWorkerSettings,
) -> Result<QueueSettings, LoadError> {
    let backend = match queue.backend {
        Some(value) => QueueBackend::from_str(&value)
            .map_err(|reason| LoadError::invalid("queue.backend", reason))?,
        None => QueueBackend::Postgres,
    };

    let channel = non_blank(queue.channel).unwrap_or_else(|| DEFAULT_DELETE_CHANNEL.to_string());

    let visibility_timeout = positive_duration(
        queue
            .visibility_timeout_seconds
            .unwrap_or(DEFAULT_QUEUE_VISIBILITY_TIMEOUT_SECS),
        "queue.visibility_timeout_seconds",
        Duration::from_secs,
    )?;

    // A task must stay leased for its whole retry sequence.
    let retry_window = workers
        .retry_interval
        .checked_mul(workers.max_retries)
        .ok_or_else(|| {
            LoadError::invalid(
                "delete_workers.max_retries",
                "retry window overflows; lower max_retries or retry_interval_seconds",
            )
        })?;
    if visibility_timeout <= retry_window {
        return Err(LoadError::invalid(
            "queue.visibility_timeout_seconds",
            format!(
                "must exceed the delete retry window of {}s",
                retry_window.as_secs()
            ),
        ));
    }

    let poll_interval = positive_duration(
        queue
            .poll_interval_ms
            .unwrap_or(DEFAULT_QUEUE_POLL_INTERVAL_MS),
        "queue.poll_interval_ms",
        Duration::from_millis,
    )?;

    Ok(QueueSettings {
        backend,
        channel,
        visibility_timeout,
        poll_interval,
    })
}

fn build_auth_settings(auth: RawAuthSettings) -> Result<AuthSettings, LoadError> {
    let token_ttl = positive_duration(
        auth.token_ttl_seconds.unwrap_or(DEFAULT_TOKEN_TTL_SECS),
        "auth.token_ttl_seconds",
        Duration::from_secs,
    )?;

    Ok(AuthSettings {
        secret: non_blank(auth.secret),
        token_ttl,
    })
}

fn build_history_settings(history: RawHistorySettings) -> Result<HistorySettings, LoadError> {
    let policy = match history.policy.as_deref().map(str::trim) {
        None | Some("record_new") => HistoryPolicy::RecordNew,
        Some("record_previous") => HistoryPolicy::RecordPrevious,
        Some(other) => {
            return Err(LoadError::invalid(
                "history.policy",
                format!("expected `record_new` or `record_previous`, got `{other}`"),
            ));
        }
    };

    Ok(HistorySettings { policy })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
    acquire_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    ttl_seconds: Option<u64>,
    capacity: Option<usize>,
    populate_workers: Option<usize>,
    populate_queue_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawQueueSettings {
    backend: Option<String>,
    channel: Option<String>,
    visibility_timeout_seconds: Option<u64>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDeleteWorkerSettings {
    workers: Option<usize>,
    max_retries: Option<u32>,
    retry_interval_seconds: Option<u64>,
    restart_cooldown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAuthSettings {
    secret: Option<String>,
    token_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHistorySettings {
    policy: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }

    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;

    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn positive_usize(value: usize, key: &'static str) -> Result<usize, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(value)
}

fn positive_duration(
    value: u64,
    key: &'static str,
    unit: fn(u64) -> Duration,
) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(unit(value))
}
