//! Storage ports
//!
//! The services only see these traits. Every implementation must make
//! [`RideRepository::update_if_status`] and [`RideRepository::set_rating`]
//! atomic: two concurrent callers expecting the same status can never both
//! succeed. That guarantee is what decides the accept race.

use crate::models::{
    ActiveDriver, Location, RatingSide, Ride, RideId, RideStats, RideStatus, Role, RoleCounts, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or the statement failed
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// A conditional write kept losing to concurrent writers
    #[error("write conflict on {0}")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get(&self, id: &str) -> StoreResult<Option<User>>;

    /// Insert or replace the whole record
    async fn upsert(&self, user: &User) -> StoreResult<()>;

    /// Refresh name, handle and last seen; false if the user is unknown
    async fn touch(
        &self,
        id: &str,
        display_name: &str,
        username: Option<&str>,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn set_role(&self, id: &str, role: Role) -> StoreResult<()>;

    /// Count one finished ride and add `credit` to the balance
    async fn record_ride(&self, id: &str, credit: f64) -> StoreResult<()>;

    /// Fold `stars` into the running rating mean
    async fn add_rating(&self, id: &str, stars: u8) -> StoreResult<()>;

    /// Delete users last seen before `before` that hold no open ride
    async fn delete_inactive(&self, before: DateTime<Utc>) -> StoreResult<u64>;

    async fn role_counts(&self) -> StoreResult<RoleCounts>;
}

#[async_trait]
pub trait RideRepository: Send + Sync {
    async fn get(&self, id: &str) -> StoreResult<Option<Ride>>;

    async fn insert(&self, ride: &Ride) -> StoreResult<()>;

    /// Replace the ride only if its stored status is still `expected`
    ///
    /// Returns false when another writer got there first.
    async fn update_if_status(&self, ride: &Ride, expected: RideStatus) -> StoreResult<bool>;

    /// Record a rating on a completed ride unless that side already rated
    async fn set_rating(&self, id: &str, side: RatingSide, stars: u8) -> StoreResult<bool>;

    /// The customer's non-terminal ride, if any
    async fn open_for_customer(&self, customer_id: &str) -> StoreResult<Option<Ride>>;

    /// The driver's accepted but unfinished ride, if any
    async fn open_for_driver(&self, driver_id: &str) -> StoreResult<Option<Ride>>;

    /// Ids of pending rides created before `before`, oldest first
    async fn pending_before(&self, before: DateTime<Utc>) -> StoreResult<Vec<RideId>>;

    /// Rides the user took part in on any side, newest first
    async fn history(&self, user_id: &str, limit: usize) -> StoreResult<Vec<Ride>>;

    async fn recent(&self, limit: usize) -> StoreResult<Vec<Ride>>;

    async fn stats(&self) -> StoreResult<RideStats>;

    /// Delete terminal rides created before `before`
    async fn delete_terminal_before(&self, before: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait DriverRepository: Send + Sync {
    async fn get(&self, user_id: &str) -> StoreResult<Option<ActiveDriver>>;

    async fn upsert(&self, driver: &ActiveDriver) -> StoreResult<()>;

    /// Returns whether a row was removed
    async fn delete(&self, user_id: &str) -> StoreResult<bool>;

    /// Move the driver and refresh their activity, leaving availability
    /// untouched; false if the driver is off duty
    async fn touch_location(
        &self,
        user_id: &str,
        location: Location,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Flip availability; a driver who went off duty is left alone
    async fn set_available(&self, user_id: &str, available: bool) -> StoreResult<()>;

    /// Available drivers active at or after `fresh_since`
    async fn list_available(&self, fresh_since: DateTime<Utc>) -> StoreResult<Vec<ActiveDriver>>;

    /// Remove drivers last active before `before`
    async fn delete_stale(&self, before: DateTime<Utc>) -> StoreResult<u64>;
}

/// The three repositories handed to every service
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserRepository>,
    pub rides: Arc<dyn RideRepository>,
    pub drivers: Arc<dyn DriverRepository>,
}
