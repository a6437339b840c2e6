use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod conversation;
mod error;
mod events;
mod handler;
mod menu;
mod repositories;
mod routes;
mod scheduler;
mod state;
mod telegram;

use common::{
    cache::{RedisConfig, RedisPool},
    database::{DatabaseConfig, health_check, init_pool},
    error::DatabaseError,
};
use dispatch::{
    accounts::AccountService,
    clock::{Clock, SystemClock},
    lifecycle::RideService,
    memory::MemoryStore,
    notify::Notifier,
    sweep::MaintenanceService,
};

use crate::{
    config::{AppConfig, StoreBackend},
    conversation::{RedisSessions, SessionStore},
    handler::ChatHandler,
    scheduler::MaintenanceScheduler,
    state::{AppState, Backend},
    telegram::TelegramClient,
};

/// `RUST_LOG` when set and valid, `info` otherwise
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt().with_env_filter(log_filter()).init();

    info!("Starting ride bot");

    let config = AppConfig::from_env()?;
    let dispatch_config = config.dispatch_config();

    let (backend, stores) = match config.store_backend {
        StoreBackend::Postgres => {
            let db_config = DatabaseConfig::from_env()?;
            let pool = init_pool(&db_config).await?;

            if health_check(&pool).await? {
                info!("Database connection successful");
            } else {
                anyhow::bail!("Failed to connect to database");
            }

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            info!("Database migrations applied");

            let stores = repositories::postgres_stores(pool.clone());
            (Backend::Postgres(pool), stores)
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; rides are lost on restart");
            (Backend::Memory, Arc::new(MemoryStore::new()).into_stores())
        }
    };

    let sessions: Arc<dyn SessionStore> = match RedisConfig::from_env() {
        Some(redis_config) => {
            let redis_pool = RedisPool::new(&redis_config)?;
            if redis_pool.health_check().await? {
                info!("Redis connection successful");
            }
            Arc::new(RedisSessions::new(redis_pool))
        }
        None => {
            info!("REDIS_URL not set, keeping conversation state in memory");
            conversation::in_memory()
        }
    };

    let telegram = TelegramClient::new(&config.bot_token)?;
    match telegram.get_me().await {
        Ok(me) => info!(
            "Connected to Telegram as @{}",
            me["username"].as_str().unwrap_or("unknown")
        ),
        Err(e) => warn!("Could not reach Telegram: {}", e),
    }
    if let Some(url) = config.webhook_url() {
        if let Err(e) = telegram
            .set_webhook(&url, config.webhook_secret.as_deref())
            .await
        {
            warn!("Failed to register webhook at {}: {}", url, e);
        }
    }
    let notifier: Arc<dyn Notifier> = Arc::new(telegram.clone());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let rides = Arc::new(RideService::new(
        stores.clone(),
        notifier.clone(),
        clock.clone(),
        dispatch_config.clone(),
    ));
    let accounts = Arc::new(AccountService::new(
        stores.clone(),
        clock.clone(),
        config.admin_policy(),
    ));
    let maintenance = Arc::new(MaintenanceService::new(
        stores.clone(),
        rides.clone(),
        clock.clone(),
        dispatch_config,
    ));
    let handler = Arc::new(ChatHandler::new(
        rides,
        accounts,
        stores.clone(),
        sessions.clone(),
        notifier,
    ));

    let mut scheduler = MaintenanceScheduler::new(maintenance).start(&config).await?;

    let port = config.port;
    let app_state = AppState {
        config: Arc::new(config),
        backend,
        stores,
        clock,
        sessions,
        telegram,
        handler,
    };

    // Start the web server
    let app = routes::create_router(app_state);

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Ride bot listening on 0.0.0.0:{}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    info!("Shutting down ride bot");
    scheduler.shutdown().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn rust_log_drives_the_filter() {
        unsafe { std::env::set_var("RUST_LOG", "bot=debug,sqlx=warn") };
        let filter = log_filter().to_string();
        assert!(filter.contains("bot=debug"));
        assert!(filter.contains("sqlx=warn"));

        unsafe { std::env::remove_var("RUST_LOG") };
        assert_eq!(log_filter().to_string(), "info");
    }
}
