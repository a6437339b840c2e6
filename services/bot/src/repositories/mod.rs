//! PostgreSQL implementations of the dispatch storage ports

pub mod drivers;
pub mod rides;
pub mod users;

pub use drivers::DriverRepository;
pub use rides::RideRepository;
pub use users::UserRepository;

use dispatch::ports::{StoreError, Stores};
use sqlx::PgPool;
use std::sync::Arc;

pub(crate) fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

pub(crate) fn corrupt(e: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(e.to_string())
}

/// Repositories sharing one pool
pub fn postgres_stores(pool: PgPool) -> Stores {
    Stores {
        users: Arc::new(UserRepository::new(pool.clone())),
        rides: Arc::new(RideRepository::new(pool.clone())),
        drivers: Arc::new(DriverRepository::new(pool)),
    }
}

/// Pool on `DATABASE_URL` with the schema applied
#[cfg(test)]
pub(crate) async fn test_pool() -> Result<PgPool, Box<dyn std::error::Error>> {
    let config = common::database::DatabaseConfig::from_env()?;
    let pool = common::database::init_pool(&config).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}
