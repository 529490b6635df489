//! HookRelay webhook delivery service.
//!
//! Main entry point. Loads configuration, prepares the database, starts the
//! delivery engine and serves the HTTP API until a shutdown signal arrives.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use hookrelay_api::{AppState, Config};
use hookrelay_core::{Clock, RealClock, Storage};
use hookrelay_delivery::{client::DeliveryClient, DeliveryEngine};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    init_tracing(&config.log_filter)?;

    info!("Starting HookRelay webhook delivery service");
    info!(
        database_url = %config.database_url_masked(),
        host = %config.host,
        port = config.port,
        poll_interval_secs = config.poll_interval_secs,
        "Configuration loaded"
    );

    let db_pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    let storage = Storage::new(db_pool.clone());
    storage.health_check().await.context("Failed to verify database connection")?;
    storage.migrate().await.context("Failed to prepare database schema")?;
    info!("Database schema ready");

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let client = DeliveryClient::new(config.client_config())
        .context("Failed to build delivery HTTP client")?;
    let engine = Arc::new(DeliveryEngine::new(
        storage.subscriptions.clone(),
        storage.webhook_events.clone(),
        Arc::new(client),
        config.delivery_config(),
        clock.clone(),
    ));
    engine.start();

    let state = AppState::from_storage(&storage, engine.clone(), clock);
    let addr = config.parse_server_addr()?;

    let served = hookrelay_api::start_server(state, addr, config.request_timeout()).await;

    engine.stop();
    info!("Delivery engine stopped");

    db_pool.close().await;
    info!("Database connections closed");

    served.context("HTTP server failed")?;

    info!("HookRelay shutdown complete");
    Ok(())
}

/// Initializes tracing. `RUST_LOG` takes precedence over the configured
/// filter.
fn init_tracing(default_filter: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .context("Invalid log filter")?;

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize tracing")?;

    Ok(())
}

/// Creates the database connection pool, retrying while the database comes
/// up.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(config.database_idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.database_max_lifetime_secs))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    "Database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}
