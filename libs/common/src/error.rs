//! Infrastructure error types shared by every crate in the workspace.

use redis::RedisError;
use sqlx::Error as SqlxError;
use thiserror::Error;

/// Errors raised while talking to PostgreSQL
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// The pool could not reach the server
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// A statement failed to execute
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// Applying the embedded schema migrations failed
    #[error("Database migration error: {0}")]
    Migration(String),

    /// The connection settings are unusable
    #[error("Database configuration error: {0}")]
    Configuration(String),
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Errors raised while talking to Redis
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache connection error: {0}")]
    Connection(#[source] RedisError),

    #[error("Cache command error: {0}")]
    Command(#[source] RedisError),
}

pub type CacheResult<T> = Result<T, CacheError>;
