//! Registration, roles and driver duty

use crate::{
    clock::Clock,
    error::{DispatchError, DispatchResult},
    models::{ActiveDriver, Location, Role, User},
    ports::Stores,
};
use std::{collections::HashSet, sync::Arc};
use tracing::info;

/// Users allowed to take the admin role
#[derive(Debug, Clone, Default)]
pub struct AdminPolicy {
    ids: HashSet<String>,
}

impl AdminPolicy {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, user_id: &str) -> bool {
        self.ids.contains(user_id)
    }
}

pub struct AccountService {
    stores: Stores,
    clock: Arc<dyn Clock>,
    admins: AdminPolicy,
}

impl AccountService {
    pub fn new(stores: Stores, clock: Arc<dyn Clock>, admins: AdminPolicy) -> Self {
        Self {
            stores,
            clock,
            admins,
        }
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admins.allows(user_id)
    }

    async fn existing(&self, user_id: &str) -> DispatchResult<User> {
        self.stores
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| DispatchError::NotRegistered {
                user_id: user_id.to_string(),
            })
    }

    async fn driver(&self, user_id: &str) -> DispatchResult<User> {
        let user = self.existing(user_id).await?;
        if !user.has_role(Role::Driver) {
            return Err(DispatchError::NotRegistered {
                user_id: user_id.to_string(),
            });
        }
        Ok(user)
    }

    /// Create the user on first contact, refresh name and last seen after
    pub async fn register_contact(
        &self,
        user_id: &str,
        display_name: &str,
        username: Option<&str>,
    ) -> DispatchResult<User> {
        let now = self.clock.now();
        let users = &self.stores.users;
        if users.touch(user_id, display_name, username, now).await? {
            return self.existing(user_id).await;
        }

        info!("New user {}", user_id);
        let user = User::new(user_id, display_name, username.map(str::to_string), now);
        users.upsert(&user).await?;
        Ok(user)
    }

    /// Switch the user's role
    ///
    /// Refused while the user has an open ride. Leaving the driver role
    /// also takes the user off duty.
    pub async fn select_role(&self, user_id: &str, role: Role) -> DispatchResult<User> {
        let mut user = self.existing(user_id).await?;
        if role == Role::Admin && !self.admins.allows(user_id) {
            return Err(DispatchError::RoleNotAllowed { role });
        }
        if user.role == Some(role) {
            return Ok(user);
        }

        if let Some(open) = self.stores.rides.open_for_customer(user_id).await? {
            return Err(DispatchError::RoleChangeBlocked { ride_id: open.id });
        }
        if let Some(open) = self.stores.rides.open_for_driver(user_id).await? {
            return Err(DispatchError::RoleChangeBlocked { ride_id: open.id });
        }

        if user.has_role(Role::Driver) {
            self.stores.drivers.delete(user_id).await?;
        }

        self.stores.users.set_role(user_id, role).await?;
        user.role = Some(role);
        info!("User {} is now a {}", user_id, role);
        Ok(user)
    }

    /// Put a driver on duty, keeping a previously known location
    pub async fn start_duty(
        &self,
        user_id: &str,
        vehicle: Option<String>,
    ) -> DispatchResult<ActiveDriver> {
        let user = self.driver(user_id).await?;
        let previous = self.stores.drivers.get(user_id).await?;
        let busy = self.stores.rides.open_for_driver(user_id).await?.is_some();

        let driver = ActiveDriver {
            user_id: user.id,
            display_name: user.display_name,
            vehicle: vehicle.or_else(|| previous.as_ref().and_then(|d| d.vehicle.clone())),
            location: previous.and_then(|d| d.location),
            is_available: !busy,
            last_active: self.clock.now(),
        };
        self.stores.drivers.upsert(&driver).await?;
        info!("Driver {} started duty", user_id);
        Ok(driver)
    }

    /// Take a driver off duty; returns whether they were on duty
    pub async fn stop_duty(&self, user_id: &str) -> DispatchResult<bool> {
        self.driver(user_id).await?;
        if let Some(open) = self.stores.rides.open_for_driver(user_id).await? {
            return Err(DispatchError::DriverBusy { ride_id: open.id });
        }

        let removed = self.stores.drivers.delete(user_id).await?;
        if removed {
            info!("Driver {} stopped duty", user_id);
        }
        Ok(removed)
    }

    /// Record a location ping; an off-duty driver goes on duty
    pub async fn update_driver_location(
        &self,
        user_id: &str,
        location: Location,
    ) -> DispatchResult<ActiveDriver> {
        if !location.is_valid() {
            return Err(DispatchError::InvalidLocation);
        }
        let user = self.driver(user_id).await?;
        let now = self.clock.now();

        if self
            .stores
            .drivers
            .touch_location(user_id, location, now)
            .await?
        {
            if let Some(driver) = self.stores.drivers.get(user_id).await? {
                return Ok(driver);
            }
        }

        let busy = self.stores.rides.open_for_driver(user_id).await?.is_some();
        let driver = ActiveDriver {
            user_id: user.id,
            display_name: user.display_name,
            vehicle: None,
            location: Some(location),
            is_available: !busy,
            last_active: now,
        };
        self.stores.drivers.upsert(&driver).await?;
        info!("Driver {} went on duty by sharing a location", user_id);
        Ok(driver)
    }

    pub async fn profile(&self, user_id: &str) -> DispatchResult<User> {
        self.existing(user_id).await
    }

    /// Whether the driver is currently on duty
    pub async fn duty_status(&self, user_id: &str) -> DispatchResult<Option<ActiveDriver>> {
        Ok(self.stores.drivers.get(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::RideClass,
        ports::{DriverRepository, StoreResult},
        testing::{World, north_of_pickup, pickup},
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    /// Frees the driver, as a ride completion would, right before every
    /// write the location ping makes
    struct FreedMidPing {
        inner: Arc<dyn DriverRepository>,
    }

    #[async_trait]
    impl DriverRepository for FreedMidPing {
        async fn get(&self, user_id: &str) -> StoreResult<Option<ActiveDriver>> {
            self.inner.get(user_id).await
        }

        async fn upsert(&self, driver: &ActiveDriver) -> StoreResult<()> {
            self.inner.set_available(&driver.user_id, true).await?;
            self.inner.upsert(driver).await
        }

        async fn delete(&self, user_id: &str) -> StoreResult<bool> {
            self.inner.delete(user_id).await
        }

        async fn touch_location(
            &self,
            user_id: &str,
            location: Location,
            seen_at: DateTime<Utc>,
        ) -> StoreResult<bool> {
            self.inner.set_available(user_id, true).await?;
            self.inner.touch_location(user_id, location, seen_at).await
        }

        async fn set_available(&self, user_id: &str, available: bool) -> StoreResult<()> {
            self.inner.set_available(user_id, available).await
        }

        async fn list_available(
            &self,
            fresh_since: DateTime<Utc>,
        ) -> StoreResult<Vec<ActiveDriver>> {
            self.inner.list_available(fresh_since).await
        }

        async fn delete_stale(&self, before: DateTime<Utc>) -> StoreResult<u64> {
            self.inner.delete_stale(before).await
        }
    }

    #[tokio::test]
    async fn first_contact_creates_a_user_without_role() {
        let world = World::new();
        let user = world
            .accounts
            .register_contact("42", "Ada", Some("ada"))
            .await
            .unwrap();
        assert_eq!(user.role, None);
        assert_eq!(user.rating, User::DEFAULT_RATING);

        world.clock.advance_minutes(5);
        let again = world
            .accounts
            .register_contact("42", "Ada L.", None)
            .await
            .unwrap();
        assert_eq!(again.created_at, user.created_at);
        assert_eq!(again.display_name, "Ada L.");
        assert!(again.last_seen > user.last_seen);
    }

    #[tokio::test]
    async fn admin_role_needs_the_allow_list() {
        let world = World::new();
        world.accounts.register_contact("1", "Root", None).await.unwrap();
        world.accounts.register_contact("2", "Eve", None).await.unwrap();

        assert!(world.accounts.select_role("1", Role::Admin).await.is_ok());
        assert!(matches!(
            world.accounts.select_role("2", Role::Admin).await,
            Err(DispatchError::RoleNotAllowed { role: Role::Admin })
        ));
    }

    #[tokio::test]
    async fn role_is_locked_while_a_ride_is_open() {
        let world = World::new();
        world.customer("c1").await;
        world
            .rides
            .create_ride("c1", pickup(), RideClass::Economy, None)
            .await
            .unwrap();

        assert!(matches!(
            world.accounts.select_role("c1", Role::Driver).await,
            Err(DispatchError::RoleChangeBlocked { .. })
        ));
    }

    #[tokio::test]
    async fn leaving_the_driver_role_ends_duty() {
        let world = World::new();
        world.driver_at("d1", 0.5).await;
        assert!(world.accounts.duty_status("d1").await.unwrap().is_some());

        world.accounts.select_role("d1", Role::Customer).await.unwrap();
        assert!(world.accounts.duty_status("d1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn start_duty_keeps_known_location() {
        let world = World::new();
        let before = world.driver_at("d1", 1.0).await;
        world.accounts.stop_duty("d1").await.unwrap();
        assert!(world.accounts.duty_status("d1").await.unwrap().is_none());

        world
            .accounts
            .update_driver_location("d1", before.location.unwrap())
            .await
            .unwrap();
        let restarted = world
            .accounts
            .start_duty("d1", Some("Blue Nexia".into()))
            .await
            .unwrap();
        assert_eq!(restarted.location, before.location);
        assert_eq!(restarted.vehicle.as_deref(), Some("Blue Nexia"));
        assert!(restarted.is_available);
    }

    #[tokio::test]
    async fn location_ping_keeps_availability_set_concurrently() {
        let world = World::new();
        world.driver_at("d1", 1.0).await;
        world.stores.drivers.set_available("d1", false).await.unwrap();

        let mut stores = world.stores.clone();
        stores.drivers = Arc::new(FreedMidPing {
            inner: world.stores.drivers.clone(),
        });
        let accounts = AccountService::new(stores, world.clock.clone(), AdminPolicy::default());

        world.clock.advance_minutes(1);
        let moved = north_of_pickup(0.3);
        let pinged = accounts.update_driver_location("d1", moved).await.unwrap();
        assert_eq!(pinged.location, Some(moved));

        let stored = world.stores.drivers.get("d1").await.unwrap().unwrap();
        assert!(stored.is_available);
        assert_eq!(stored.location, Some(moved));
        assert_eq!(stored.last_active, world.clock.now());

        world.customer("c1").await;
        let created = world
            .rides
            .create_ride("c1", pickup(), RideClass::Economy, None)
            .await
            .unwrap();
        assert_eq!(created.notified, 1);
    }

    #[tokio::test]
    async fn customers_cannot_go_on_duty() {
        let world = World::new();
        world.customer("c1").await;
        assert!(matches!(
            world.accounts.start_duty("c1", None).await,
            Err(DispatchError::NotRegistered { .. })
        ));
        assert!(matches!(
            world
                .accounts
                .update_driver_location("c1", Location::new(91.0, 0.0))
                .await,
            Err(DispatchError::InvalidLocation)
        ));
    }
}
