use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;

use inventory_export_api::{
    app::{create_app, AppState},
    config::{Config, StorageBackend},
    jobs::{ExportWorkerJob, JobScheduler, StaleExportSweepJob},
    middleware::{init_metrics, logging::init_logging},
    services::ExportPipeline,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load()?;

    init_logging(&config.logging).context("failed to initialize logging")?;
    init_metrics().context("failed to install metrics recorder")?;

    info!(
        backend = config.storage.backend.as_str(),
        "Starting inventory export service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let (pipeline, pool) = match config.storage.backend {
        StorageBackend::Postgres => {
            let pool = persistence::db::create_pool(&config.database.pool_config()).await?;

            info!("Running database migrations...");
            persistence::db::run_migrations(&pool).await?;
            info!("Migrations completed");

            (ExportPipeline::postgres(pool.clone(), &config)?, Some(pool))
        }
        StorageBackend::Memory => {
            info!("Using in-memory job store and task channel; jobs do not survive a restart");
            (ExportPipeline::in_memory(&config)?, None)
        }
    };

    let mut scheduler = JobScheduler::new();
    if config.export.worker_enabled {
        for _ in 0..config.export.workers {
            scheduler.register(ExportWorkerJob::new(
                pipeline.worker(config.export.worker_settings()),
                pipeline.channel.clone(),
                config.export.batch_size,
                config.export.poll_interval_ms,
            ));
        }
    }
    scheduler.register(StaleExportSweepJob::new(
        pipeline.reconciler(),
        config.export.sweep_policy(),
        config.export.sweep_interval_secs,
    ));
    scheduler.start();

    let addr = config.socket_addr()?;
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    let state = AppState::new(config, pool, &pipeline)?;
    let app = create_app(state);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    scheduler.wait_for_shutdown(shutdown_timeout).await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
