//! API server: job admission, queries and progress streaming.

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mediaconv::api::{ApiServer, ApiServerConfig, AppState};
use mediaconv::config::Config;
use mediaconv::database::repositories::{
    SqlxFileRepository, SqlxJobRepository, SqlxTenantRepository,
};
use mediaconv::database::{init_pool, run_migrations};
use mediaconv::jobs::JobService;
use mediaconv::progress::ProgressBus;
use mediaconv::queue::SqliteWorkQueue;
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
    tracing::info!(environment = %config.environment, "Starting mediaconv API server");

    let pool = init_pool(&config.database_url).await?;
    run_migrations(&pool).await?;

    let storage = StorageService::from_config(&config.storage)?;
    let bus = Arc::new(ProgressBus::new());
    let queue = Arc::new(SqliteWorkQueue::new(pool.clone()));
    let ledger = QuotaLedger::new(Arc::new(SqlxTenantRepository::new(pool.clone())));

    let service = Arc::new(JobService::new(
        Arc::new(SqlxJobRepository::new(pool.clone())),
        Arc::new(SqlxFileRepository::new(pool.clone())),
        ledger,
        queue,
        bus.clone(),
        storage,
    ));

    let server = ApiServer::new(
        ApiServerConfig {
            port: config.port,
            ..ApiServerConfig::default()
        },
        AppState::new(service, bus),
    );

    let cancel = server.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            cancel.cancel();
        }
    });

    server.run().await?;
    tracing::info!("API server stopped");
    Ok(())
}
