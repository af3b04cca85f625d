use std::{process, sync::Arc, time::Duration};

use pennant::{
    application::{
        auth::TokenService,
        banners::BannerService,
        error::AppError,
        jobs::{DeleteWorkerConfig, DeleteWorkers},
    },
    cache::{BannerCache, CacheConfig, CachePopulator, MemoryCache},
    config::{self, QueueBackend},
    infra::{
        db::{PostgresRepositories, PostgresTasks},
        error::InfraError,
        http::{self, ApiState},
        telemetry,
    },
    queue::{TaskBackend, banner::BannerQueue, memory},
};
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
        config::Command::IssueToken(args) => run_issue_token(settings, args),
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let tokens = Arc::new(token_service(&settings, settings.auth.token_ttl)?);
    let pool = connect_database(&settings).await?;
    PostgresRepositories::run_migrations(&pool).await?;

    let repositories =
        Arc::new(PostgresRepositories::new(pool.clone()).with_history_policy(settings.history.policy));

    let backend = match settings.queue.backend {
        QueueBackend::Memory => TaskBackend::Memory(memory::storage()),
        QueueBackend::Postgres => TaskBackend::Postgres(PostgresTasks::new(
            pool,
            settings.queue.poll_interval,
            settings.queue.visibility_timeout,
        )),
    };
    let banner_queue = BannerQueue::new(backend, settings.queue.channel.as_str());

    let mut banners = BannerService::new(
        repositories.clone(),
        repositories.clone(),
        banner_queue.clone(),
    );

    let populator = if settings.cache.enabled {
        let cache_config = CacheConfig::from(&settings.cache);
        let cache = BannerCache::new(Arc::new(MemoryCache::new(&cache_config)));
        let populator = Arc::new(CachePopulator::spawn(cache.clone(), &cache_config));
        banners = banners.with_cache(cache, populator.clone());
        Some(populator)
    } else {
        None
    };

    let workers = DeleteWorkers::spawn(
        repositories.clone(),
        DeleteWorkerConfig::from(&settings.delete_workers),
        &banner_queue,
    );

    info!(
        target: "pennant::serve",
        history_policy = settings.history.policy.as_str(),
        queue_backend = ?settings.queue.backend,
        cache_enabled = settings.cache.enabled,
        "Banner service initialised"
    );

    let state = ApiState {
        banners: Arc::new(banners),
        tokens,
        db: Some(repositories),
    };
    let result = serve_http(&settings, state).await;

    banner_queue.close();
    workers.shutdown().await;
    if let Some(populator) = populator {
        populator.shutdown().await;
    }

    info!(target: "pennant::serve", "Shutdown complete");
    result
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let pool = connect_database(&settings).await?;
    PostgresRepositories::run_migrations(&pool).await?;

    info!(target: "pennant::migrate", "Migrations applied");
    Ok(())
}

fn run_issue_token(
    settings: config::Settings,
    args: config::IssueTokenArgs,
) -> Result<(), AppError> {
    let ttl = args
        .ttl_seconds
        .map(Duration::from_secs)
        .unwrap_or(settings.auth.token_ttl);
    let tokens = token_service(&settings, ttl)?;

    let token = tokens.issue(args.user_id, args.role.into())?;

    println!("{token}");
    Ok(())
}

fn token_service(settings: &config::Settings, ttl: Duration) -> Result<TokenService, AppError> {
    let secret = settings
        .auth
        .secret
        .as_deref()
        .ok_or(AppError::MissingSecret)?;

    Ok(TokenService::new(secret, ttl))
}

async fn connect_database(settings: &config::Settings) -> Result<PgPool, AppError> {
    let database_url = settings
        .database
        .url
        .as_deref()
        .ok_or(InfraError::MissingDatabaseUrl)?;

    PostgresRepositories::connect(
        database_url,
        settings.database.max_connections.get(),
        settings.database.acquire_timeout,
    )
    .await
    .map_err(AppError::from)
}

async fn serve_http(settings: &config::Settings, state: ApiState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let addr = settings.server.addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| InfraError::Bind { addr, source })?;

    info!(target: "pennant::serve", addr = %settings.server.addr, "HTTP server listening");

    let (drain_tx, mut drain_rx) = watch::channel(false);
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = drain_rx.wait_for(|draining| *draining).await;
            })
            .await
    });

    tokio::select! {
        _ = shutdown_signal() => {}
        joined = &mut server => return server_result(joined),
    }

    info!(
        target: "pennant::serve",
        grace_ms = settings.server.graceful_shutdown.as_millis() as u64,
        "Shutdown signal received; draining requests"
    );
    drain_tx.send_replace(true);

    match tokio::time::timeout(settings.server.graceful_shutdown, &mut server).await {
        Ok(joined) => server_result(joined),
        Err(_) => {
            warn!(
                target: "pennant::serve",
                "Requests still in flight after the grace period; aborting"
            );
            server.abort();
            Ok(())
        }
    }
}

fn server_result(
    joined: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(AppError::Server(err.to_string())),
        Err(err) => Err(AppError::Server(format!("task failed: {err}"))),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target: "pennant::serve", error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(target: "pennant::serve", error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
