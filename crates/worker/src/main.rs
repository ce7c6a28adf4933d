//! Sitecraft background worker
//!
//! Runs the scheduled billing jobs against the shared database.

mod config;
mod sweep;

use std::sync::Arc;

use sitecraft_billing::{BillingService, Entitlements};
use sitecraft_shared::PoolSettings;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::WorkerConfig;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sitecraft_worker=debug,sitecraft_billing=debug".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    init_tracing();

    let config = WorkerConfig::from_env()?;
    tracing::info!(
        schedule = %config.sweep_schedule,
        window_secs = config.sweep_window.as_secs(),
        "Starting Sitecraft worker"
    );

    let pool = sitecraft_shared::create_pool(
        &config.database_url,
        PoolSettings {
            max_connections: config.database_max_connections,
            ..PoolSettings::default()
        },
    )
    .await?;

    let entitlements = Entitlements::from_pool(pool.clone());
    let billing = Arc::new(BillingService::from_env(pool, entitlements)?);

    if config.sweep_on_startup {
        sweep::run_sweep(&billing, config.sweep_window).await;
    }

    let mut scheduler = JobScheduler::new().await?;

    let window = config.sweep_window;
    let job_billing = billing.clone();
    scheduler
        .add(Job::new_async(config.sweep_schedule.as_str(), move |_id, _scheduler| {
            let billing = job_billing.clone();
            Box::pin(async move {
                sweep::run_sweep(&billing, window).await;
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!("Worker scheduler started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping worker");

    scheduler.shutdown().await?;

    Ok(())
}
