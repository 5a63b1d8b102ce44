use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use domain::services::EmailQueueProcessor;
use persistence::repositories::{EmailQueueRepository, NotificationPreferenceRepository};
use practice_hub_api::{
    app, config,
    jobs::{EmailQueueJob, JobScheduler},
    middleware, services,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = config::Config::load()?;

    middleware::logging::init_logging(&config.logging)
        .context("failed to initialise logging")?;
    middleware::init_metrics().context("failed to install Prometheus recorder")?;

    info!("Starting Practice Hub API v{}", env!("CARGO_PKG_VERSION"));

    let pool = persistence::db::create_pool(&(&config.database).into()).await?;

    info!("Running database migrations...");
    sqlx::migrate!("../persistence/src/migrations")
        .run(&pool)
        .await?;
    info!("Migrations completed");

    let email_queue = EmailQueueRepository::new(pool.clone());
    let transport = services::build_transport(&config.email)?;
    let processor = EmailQueueProcessor::new(
        Arc::new(email_queue.clone()),
        Arc::new(NotificationPreferenceRepository::new(pool.clone())),
        transport,
        config.email.from_address(),
    );

    let mut scheduler = JobScheduler::new();
    if config.email_queue.enabled {
        scheduler.register(
            EmailQueueJob::new(processor, &config.email_queue).with_stats(email_queue),
        );
        scheduler.start();
        info!(
            provider = %config.email.provider,
            interval_secs = config.email_queue.interval_secs,
            "Email queue worker started"
        );
    } else {
        info!("Email queue worker disabled");
    }

    let app = app::create_app(config.clone(), pool);

    let addr = config.socket_addr()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped, waiting for background jobs");
    scheduler.shutdown();
    scheduler.wait_for_shutdown(Duration::from_secs(30)).await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
