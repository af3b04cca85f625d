use std::sync::Arc;

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::context::{DeleteWorkerConfig, DeleteWorkerContext};
use super::delete::process_delete_job;
use crate::{
    application::repos::BannersWriteRepo,
    queue::{TaskBackend, banner::BannerQueue},
};

const METRIC_WORKER_RESTART: &str = "pennant_delete_worker_restart_total";
const WORKER_NAME: &str = "banner-delete-worker";

/// apalis workers consuming the delete channel, restarted after a cooldown
/// whenever their monitor stops on its own.
pub struct DeleteWorkers {
    stop: watch::Sender<bool>,
    runner: JoinHandle<()>,
}

impl DeleteWorkers {
    pub fn spawn(
        repo: Arc<dyn BannersWriteRepo>,
        config: DeleteWorkerConfig,
        queue: &BannerQueue,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let ctx = DeleteWorkerContext {
            repo,
            config,
            stop: stop_rx,
        };

        info!(
            target: "pennant::application::jobs::workers",
            workers = config.workers.max(1),
            channel = queue.channel(),
            backend = queue.backend_kind(),
            "Delete workers started"
        );

        let runner = tokio::spawn(run_monitor(
            ctx,
            queue.consume(),
            queue.channel().to_owned(),
        ));

        Self { stop, runner }
    }

    pub fn is_stopping(&self) -> bool {
        *self.stop.borrow()
    }

    /// Raises stop and waits for the monitor to wind down.
    ///
    /// A delete already running finishes first; a task waiting between
    /// attempts is handed back for redelivery.
    pub async fn shutdown(self) {
        self.stop.send_replace(true);

        if let Err(err) = self.runner.await {
            warn!(
                target: "pennant::application::jobs::workers",
                error = %err,
                "Delete worker runner ended abnormally"
            );
        }

        info!(target: "pennant::application::jobs::workers", "Delete workers stopped");
    }
}

fn build_monitor(ctx: &DeleteWorkerContext, backend: &TaskBackend, channel: &str) -> Monitor {
    // Each arm builds its own `WorkerBuilder`: the builder's service type is
    // fixed by its backend's context type, so one builder cannot serve both.
    match backend {
        TaskBackend::Postgres(tasks) => Monitor::new().register(
            WorkerBuilder::new(WORKER_NAME)
                .concurrency(ctx.config.workers.max(1))
                .data(ctx.clone())
                .backend(tasks.storage(channel))
                .build_fn(process_delete_job),
        ),
        TaskBackend::Memory(storage) => Monitor::new().register(
            WorkerBuilder::new(WORKER_NAME)
                .concurrency(ctx.config.workers.max(1))
                .data(ctx.clone())
                .backend(storage.clone())
                .build_fn(process_delete_job),
        ),
    }
}

async fn run_monitor(ctx: DeleteWorkerContext, backend: TaskBackend, channel: String) {
    let mut stop = ctx.stop.clone();

    loop {
        let monitor = build_monitor(&ctx, &backend, &channel);
        let mut signal = stop.clone();
        let run = tokio::spawn(monitor.run_with_signal(async move {
            let _ = signal.wait_for(|stopping| *stopping).await;
            Ok(())
        }));

        let result = run.await;
        if *stop.borrow() {
            if let Ok(Err(err)) = result {
                warn!(
                    target: "pennant::application::jobs::workers",
                    error = %err,
                    "Delete job monitor reported an error while stopping"
                );
            }
            return;
        }

        match result {
            Ok(Ok(())) => warn!(
                target: "pennant::application::jobs::workers",
                "Delete job monitor exited unexpectedly"
            ),
            Ok(Err(err)) => error!(
                target: "pennant::application::jobs::workers",
                error = %err,
                "Delete job monitor failed"
            ),
            Err(err) => error!(
                target: "pennant::application::jobs::workers",
                error = %err,
                "Delete job monitor panicked"
            ),
        }

        counter!(METRIC_WORKER_RESTART).increment(1);
        warn!(
            target: "pennant::application::jobs::workers",
            cooldown_ms = ctx.config.restart_cooldown.as_millis() as u64,
            "Restarting delete job monitor after cooldown"
        );

        tokio::select! {
            _ = stop.wait_for(|stopping| *stopping) => return,
            _ = tokio::time::sleep(ctx.config.restart_cooldown) => {}
        }
    }
}
