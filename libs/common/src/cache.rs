//! Redis-backed key/value cache
//!
//! Short-lived conversation state lives here when a Redis URL is configured:
//! values with a TTL, one-shot reads and `SET NX` claims used to drop duplicate
//! deliveries.

use crate::error::{CacheError, CacheResult};
use redis::{AsyncCommands, Client};
use tracing::info;

/// Configuration for Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Prepended to every key so several bots can share one server
    pub key_prefix: String,
}

impl RedisConfig {
    /// Read the Redis settings from the environment
    ///
    /// Returns `None` when `REDIS_URL` is unset, in which case callers keep
    /// their state in process memory.
    ///
    /// # Environment Variables
    /// - `REDIS_URL`: Redis connection URL
    /// - `REDIS_KEY_PREFIX`: key namespace (default: "ride-bot")
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("REDIS_URL").ok().filter(|u| !u.is_empty())?;
        let key_prefix =
            std::env::var("REDIS_KEY_PREFIX").unwrap_or_else(|_| "ride-bot".to_string());

        Some(RedisConfig { url, key_prefix })
    }
}

/// Redis connection handle
#[derive(Clone)]
pub struct RedisPool {
    client: Client,
    key_prefix: String,
}

impl RedisPool {
    /// Initialize a new Redis client
    pub fn new(config: &RedisConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.clone()).map_err(CacheError::Connection)?;
        info!("Redis client initialized with URL: {}", config.url);
        Ok(RedisPool {
            client,
            key_prefix: config.key_prefix.clone(),
        })
    }

    async fn get_connection(&self) -> CacheResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(CacheError::Connection)
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    /// Set a key-value pair in Redis with optional TTL
    pub async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        let key = self.key(key);

        if let Some(ttl) = ttl_seconds {
            let _: () = conn
                .set_ex(key, value, ttl)
                .await
                .map_err(CacheError::Command)?;
        } else {
            let _: () = conn.set(key, value).await.map_err(CacheError::Command)?;
        }

        Ok(())
    }

    /// Get a value from Redis by key
    pub async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.get_connection().await?;
        let value: Option<String> = conn.get(self.key(key)).await.map_err(CacheError::Command)?;
        Ok(value)
    }

    /// Read a value and remove it in the same round trip
    pub async fn take(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.get_connection().await?;
        let value: Option<String> = redis::cmd("GETDEL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await
            .map_err(CacheError::Command)?;
        Ok(value)
    }

    /// Delete a key from Redis
    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        let _: u64 = conn.del(self.key(key)).await.map_err(CacheError::Command)?;
        Ok(())
    }

    /// Store `key` only if it does not exist yet
    ///
    /// Returns true for the caller that created the key.
    pub async fn claim(&self, key: &str, ttl_seconds: u64) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(CacheError::Command)?;
        Ok(reply.is_some())
    }

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(CacheError::Command)?;
        Ok(pong == "PONG")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_redis_config_absent_without_url() {
        unsafe { std::env::remove_var("REDIS_URL") };
        assert!(RedisConfig::from_env().is_none());
    }

    #[test]
    #[serial]
    fn test_redis_config_uses_default_prefix() {
        unsafe {
            std::env::set_var("REDIS_URL", "redis://cache:6379");
            std::env::remove_var("REDIS_KEY_PREFIX");
        }

        let config = RedisConfig::from_env().expect("REDIS_URL is set");
        assert_eq!(config.url, "redis://cache:6379");
        assert_eq!(config.key_prefix, "ride-bot");

        unsafe { std::env::remove_var("REDIS_URL") };
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_claim_is_exclusive() -> CacheResult<()> {
        let config = RedisConfig {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "ride-bot-test".to_string(),
        };

        let pool = RedisPool::new(&config)?;
        pool.delete("claim").await?;

        assert!(pool.claim("claim", 5).await?);
        assert!(!pool.claim("claim", 5).await?);

        pool.delete("claim").await?;
        Ok(())
    }
}
