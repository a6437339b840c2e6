//! In-process store
//!
//! Backs the bot when no database is configured and every test in the
//! workspace. Each map sits behind its own async mutex, so a conditional
//! update reads and writes under one lock and is atomic.

use crate::{
    models::{
        ActiveDriver, Location, RatingSide, Ride, RideId, RideStats, RideStatus, Role, RoleCounts, User,
    },
    ports::{DriverRepository, RideRepository, StoreResult, Stores, UserRepository},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<String, User>>,
    rides: Mutex<HashMap<RideId, Ride>>,
    drivers: Mutex<HashMap<String, ActiveDriver>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand the same store out as all three repositories
    pub fn into_stores(self: Arc<Self>) -> Stores {
        Stores {
            users: self.clone(),
            rides: self.clone(),
            drivers: self,
        }
    }
}

fn is_open_for_driver(ride: &Ride, driver_id: &str) -> bool {
    !ride.status.is_terminal() && ride.driver_id.as_deref() == Some(driver_id)
}

fn newest_first(rides: &mut [Ride]) {
    rides.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn get(&self, id: &str) -> StoreResult<Option<User>> {
        Ok(self.users.lock().await.get(id).cloned())
    }

    async fn upsert(&self, user: &User) -> StoreResult<()> {
        self.users
            .lock()
            .await
            .insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn touch(
        &self,
        id: &str,
        display_name: &str,
        username: Option<&str>,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut users = self.users.lock().await;
        let Some(user) = users.get_mut(id) else {
            return Ok(false);
        };
        user.display_name = display_name.to_string();
        user.username = username.map(str::to_string);
        user.last_seen = seen_at;
        Ok(true)
    }

    async fn set_role(&self, id: &str, role: Role) -> StoreResult<()> {
        if let Some(user) = self.users.lock().await.get_mut(id) {
            user.role = Some(role);
        }
        Ok(())
    }

    async fn record_ride(&self, id: &str, credit: f64) -> StoreResult<()> {
        if let Some(user) = self.users.lock().await.get_mut(id) {
            user.total_rides += 1;
            user.balance += credit.max(0.0);
        }
        Ok(())
    }

    async fn add_rating(&self, id: &str, stars: u8) -> StoreResult<()> {
        if let Some(user) = self.users.lock().await.get_mut(id) {
            let count = f64::from(user.rating_count);
            user.rating = (user.rating * count + f64::from(stars)) / (count + 1.0);
            user.rating_count += 1;
        }
        Ok(())
    }

    async fn delete_inactive(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let mut users = self.users.lock().await;
        let rides = self.rides.lock().await;

        let busy: Vec<&str> = rides
            .values()
            .filter(|r| !r.status.is_terminal())
            .flat_map(|r| std::iter::once(r.customer_id.as_str()).chain(r.driver_id.as_deref()))
            .collect();

        let before_len = users.len();
        users.retain(|id, user| user.last_seen >= before || busy.contains(&id.as_str()));
        Ok((before_len - users.len()) as u64)
    }

    async fn role_counts(&self) -> StoreResult<RoleCounts> {
        let users = self.users.lock().await;
        let mut counts = RoleCounts::default();
        for user in users.values() {
            match user.role {
                Some(Role::Customer) => counts.customers += 1,
                Some(Role::Driver) => counts.drivers += 1,
                Some(Role::Admin) => counts.admins += 1,
                None => counts.unassigned += 1,
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl RideRepository for MemoryStore {
    async fn get(&self, id: &str) -> StoreResult<Option<Ride>> {
        Ok(self.rides.lock().await.get(id).cloned())
    }

    async fn insert(&self, ride: &Ride) -> StoreResult<()> {
        self.rides
            .lock()
            .await
            .insert(ride.id.clone(), ride.clone());
        Ok(())
    }

    async fn update_if_status(&self, ride: &Ride, expected: RideStatus) -> StoreResult<bool> {
        let mut rides = self.rides.lock().await;
        match rides.get_mut(&ride.id) {
            Some(stored) if stored.status == expected => {
                *stored = ride.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_rating(&self, id: &str, side: RatingSide, stars: u8) -> StoreResult<bool> {
        let mut rides = self.rides.lock().await;
        let Some(ride) = rides.get_mut(id) else {
            return Ok(false);
        };
        if ride.status != RideStatus::Completed {
            return Ok(false);
        }

        let slot = match side {
            RatingSide::ByCustomer => &mut ride.customer_rating,
            RatingSide::ByDriver => &mut ride.driver_rating,
        };
        if slot.is_some() {
            return Ok(false);
        }
        *slot = Some(stars);
        Ok(true)
    }

    async fn open_for_customer(&self, customer_id: &str) -> StoreResult<Option<Ride>> {
        let rides = self.rides.lock().await;
        Ok(rides
            .values()
            .filter(|r| r.customer_id == customer_id && !r.status.is_terminal())
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn open_for_driver(&self, driver_id: &str) -> StoreResult<Option<Ride>> {
        let rides = self.rides.lock().await;
        Ok(rides
            .values()
            .filter(|r| is_open_for_driver(r, driver_id))
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn pending_before(&self, before: DateTime<Utc>) -> StoreResult<Vec<RideId>> {
        let rides = self.rides.lock().await;
        let mut pending: Vec<&Ride> = rides
            .values()
            .filter(|r| r.status == RideStatus::Pending && r.created_at < before)
            .collect();
        pending.sort_by_key(|r| r.created_at);
        Ok(pending.into_iter().map(|r| r.id.clone()).collect())
    }

    async fn history(&self, user_id: &str, limit: usize) -> StoreResult<Vec<Ride>> {
        let rides = self.rides.lock().await;
        let mut mine: Vec<Ride> = rides
            .values()
            .filter(|r| r.involves(user_id))
            .cloned()
            .collect();
        newest_first(&mut mine);
        mine.truncate(limit);
        Ok(mine)
    }

    async fn recent(&self, limit: usize) -> StoreResult<Vec<Ride>> {
        let rides = self.rides.lock().await;
        let mut all: Vec<Ride> = rides.values().cloned().collect();
        newest_first(&mut all);
        all.truncate(limit);
        Ok(all)
    }

    async fn stats(&self) -> StoreResult<RideStats> {
        let rides = self.rides.lock().await;
        let by_status = RideStatus::ALL
            .into_iter()
            .map(|status| {
                let n = rides.values().filter(|r| r.status == status).count() as u64;
                (status, n)
            })
            .filter(|(_, n)| *n > 0)
            .collect();
        let completed_revenue = rides
            .values()
            .filter(|r| r.status == RideStatus::Completed)
            .filter_map(|r| r.fare)
            .sum();

        Ok(RideStats {
            total: rides.len() as u64,
            by_status,
            completed_revenue,
        })
    }

    async fn delete_terminal_before(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let mut rides = self.rides.lock().await;
        let before_len = rides.len();
        rides.retain(|_, r| !(r.status.is_terminal() && r.created_at < before));
        Ok((before_len - rides.len()) as u64)
    }
}

#[async_trait]
impl DriverRepository for MemoryStore {
    async fn get(&self, user_id: &str) -> StoreResult<Option<ActiveDriver>> {
        Ok(self.drivers.lock().await.get(user_id).cloned())
    }

    async fn upsert(&self, driver: &ActiveDriver) -> StoreResult<()> {
        self.drivers
            .lock()
            .await
            .insert(driver.user_id.clone(), driver.clone());
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> StoreResult<bool> {
        Ok(self.drivers.lock().await.remove(user_id).is_some())
    }

    async fn touch_location(
        &self,
        user_id: &str,
        location: Location,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        match self.drivers.lock().await.get_mut(user_id) {
            Some(driver) => {
                driver.location = Some(location);
                driver.last_active = seen_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_available(&self, user_id: &str, available: bool) -> StoreResult<()> {
        if let Some(driver) = self.drivers.lock().await.get_mut(user_id) {
            driver.is_available = available;
        }
        Ok(())
    }

    async fn list_available(&self, fresh_since: DateTime<Utc>) -> StoreResult<Vec<ActiveDriver>> {
        let drivers = self.drivers.lock().await;
        Ok(drivers
            .values()
            .filter(|d| d.is_available && d.last_active >= fresh_since)
            .cloned()
            .collect())
    }

    async fn delete_stale(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let mut drivers = self.drivers.lock().await;
        let before_len = drivers.len();
        drivers.retain(|_, d| d.last_active >= before);
        Ok((before_len - drivers.len()) as u64)
    }
}
