//! Queue worker: executor pool and scheduled sweeps.

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mediaconv::config::Config;
use mediaconv::database::repositories::{
    SqlxFileRepository, SqlxJobRepository, SqlxTenantRepository,
};
use mediaconv::database::{init_pool, run_migrations};
use mediaconv::janitor::{ExpireFilesHandler, Janitor, PruneJobsHandler, PruneTenantsHandler};
use mediaconv::jobs::{JobService, MediaProcessHandler};
use mediaconv::media::FfmpegTool;
use mediaconv::progress::ProgressBus;
use mediaconv::queue::{QueueRuntime, QueueRuntimeConfig, Scheduler, SqliteWorkQueue, TaskHandler};
use mediaconv::quota::QuotaLedger;
use mediaconv::storage::StorageService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediaconv=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    tracing::info!(
        environment = %config.environment,
        concurrency = config.worker_concurrency,
        "Starting mediaconv worker"
    );

    let pool = init_pool(&config.database_url).await?;
    run_migrations(&pool).await?;

    let storage = StorageService::from_config(&config.storage)?;
    let bus = Arc::new(ProgressBus::new());
    let queue = Arc::new(SqliteWorkQueue::new(pool.clone()));
    let ledger = QuotaLedger::new(Arc::new(SqlxTenantRepository::new(pool.clone())));

    let jobs_repo = Arc::new(SqlxJobRepository::new(pool.clone()));
    let files_repo = Arc::new(SqlxFileRepository::new(pool.clone()));
    let tenants_repo = Arc::new(SqlxTenantRepository::new(pool.clone()));

    let service = Arc::new(JobService::new(
        jobs_repo.clone(),
        files_repo.clone(),
        ledger,
        queue.clone(),
        bus,
        storage.clone(),
    ));

    let media = Arc::new(FfmpegTool::from_config(&config));
    let janitor = Arc::new(Janitor::new(
        files_repo.clone(),
        jobs_repo,
        tenants_repo,
        storage,
    ));

    let handlers: Vec<Arc<dyn TaskHandler>> = vec![
        Arc::new(MediaProcessHandler::new(service, files_repo, media)),
        Arc::new(ExpireFilesHandler(janitor.clone())),
        Arc::new(PruneJobsHandler(janitor.clone())),
        Arc::new(PruneTenantsHandler(janitor.clone())),
    ];

    let runtime = QueueRuntime::new(
        queue.clone(),
        QueueRuntimeConfig {
            concurrency: config.worker_concurrency,
            weights: config.queue_weights,
            ..QueueRuntimeConfig::default()
        },
    );
    runtime.start(handlers);

    let scheduler = Scheduler::new(queue);
    janitor.register_schedules(&scheduler)?;
    scheduler.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, draining workers");

    scheduler.stop().await;
    runtime.stop().await;
    tracing::info!("Worker stopped");
    Ok(())
}
