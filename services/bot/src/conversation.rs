//! Short-lived per-user conversation state
//!
//! Remembers the ride class a customer picked until their next location
//! share, and which update ids were already processed. Kept in Redis when
//! configured so several bot instances agree; otherwise in process.

use async_trait::async_trait;
use common::{cache::RedisPool, error::CacheError};
use dispatch::models::RideClass;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

/// How long a class choice waits for the pickup location
pub const CLASS_CHOICE_TTL: Duration = Duration::from_secs(10 * 60);
/// How long processed update ids are remembered
pub const SEEN_UPDATE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn remember_class(&self, user_id: &str, class: RideClass) -> Result<(), CacheError>;

    /// Return and forget the pending class choice
    async fn take_class(&self, user_id: &str) -> Result<Option<RideClass>, CacheError>;

    /// True the first time an update id is seen
    async fn first_delivery(&self, update_id: i64) -> Result<bool, CacheError>;
}

#[derive(Default)]
pub struct MemorySessions {
    classes: Mutex<HashMap<String, (RideClass, Instant)>>,
    seen: Mutex<HashMap<i64, Instant>>,
}

impl MemorySessions {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessions {
    async fn remember_class(&self, user_id: &str, class: RideClass) -> Result<(), CacheError> {
        let mut classes = self.classes.lock().await;
        classes.retain(|_, (_, at)| at.elapsed() < CLASS_CHOICE_TTL);
        classes.insert(user_id.to_string(), (class, Instant::now()));
        Ok(())
    }

    async fn take_class(&self, user_id: &str) -> Result<Option<RideClass>, CacheError> {
        let mut classes = self.classes.lock().await;
        Ok(classes
            .remove(user_id)
            .filter(|(_, at)| at.elapsed() < CLASS_CHOICE_TTL)
            .map(|(class, _)| class))
    }

    async fn first_delivery(&self, update_id: i64) -> Result<bool, CacheError> {
        let mut seen = self.seen.lock().await;
        seen.retain(|_, at| at.elapsed() < SEEN_UPDATE_TTL);
        Ok(seen.insert(update_id, Instant::now()).is_none())
    }
}

pub struct RedisSessions {
    pool: RedisPool,
}

impl RedisSessions {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for RedisSessions {
    async fn remember_class(&self, user_id: &str, class: RideClass) -> Result<(), CacheError> {
        self.pool
            .set(
                &format!("class:{}", user_id),
                class.as_str(),
                Some(CLASS_CHOICE_TTL.as_secs()),
            )
            .await
    }

    async fn take_class(&self, user_id: &str) -> Result<Option<RideClass>, CacheError> {
        let stored = self.pool.take(&format!("class:{}", user_id)).await?;
        Ok(stored.map(|value| RideClass::parse_or_default(&value)))
    }

    async fn first_delivery(&self, update_id: i64) -> Result<bool, CacheError> {
        self.pool
            .claim(&format!("update:{}", update_id), SEEN_UPDATE_TTL.as_secs())
            .await
    }
}

pub fn in_memory() -> Arc<dyn SessionStore> {
    Arc::new(MemorySessions::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn class_choice_is_consumed_once() {
        let sessions = MemorySessions::new();
        assert_ok!(sessions.remember_class("7", RideClass::Premium).await);

        assert_eq!(
            sessions.take_class("7").await.unwrap(),
            Some(RideClass::Premium)
        );
        assert_eq!(sessions.take_class("7").await.unwrap(), None);
        assert_eq!(sessions.take_class("8").await.unwrap(), None);
    }

    #[tokio::test]
    async fn updates_are_processed_once() {
        let sessions = MemorySessions::new();
        assert!(sessions.first_delivery(100).await.unwrap());
        assert!(!sessions.first_delivery(100).await.unwrap());
        assert!(sessions.first_delivery(101).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn redis_sessions_round_trip() {
        let config = common::cache::RedisConfig {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "ride-bot-test".to_string(),
        };
        let sessions = RedisSessions::new(RedisPool::new(&config).unwrap());

        assert_ok!(sessions.remember_class("7", RideClass::Comfort).await);
        assert_eq!(
            sessions.take_class("7").await.unwrap(),
            Some(RideClass::Comfort)
        );

        let update_id = i64::from(std::process::id());
        sessions.first_delivery(update_id).await.unwrap();
        assert!(!sessions.first_delivery(update_id).await.unwrap());
    }
}
