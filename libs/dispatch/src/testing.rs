//! Test doubles and a wired-up in-memory world
//!
//! Compiled for this crate's tests and for dependents enabling the
//! `test-support` feature.

use crate::{
    accounts::{AccountService, AdminPolicy},
    clock::Clock,
    config::DispatchConfig,
    lifecycle::RideService,
    memory::MemoryStore,
    models::{ActiveDriver, Location, Role, User},
    notify::{DeliveryError, Notifier, OutgoingMessage},
    ports::{DriverRepository, StoreError, StoreResult, Stores},
    sweep::MaintenanceService,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps every message instead of sending it
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<OutgoingMessage>>,
    unreachable: Mutex<HashSet<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make deliveries to `user_id` fail from now on
    pub fn fail_for(&self, user_id: &str) {
        lock(&self.unreachable).insert(user_id.to_string());
    }

    pub fn messages(&self) -> Vec<OutgoingMessage> {
        lock(&self.sent).clone()
    }

    pub fn messages_for(&self, user_id: &str) -> Vec<OutgoingMessage> {
        lock(&self.sent)
            .iter()
            .filter(|m| m.recipient == user_id)
            .cloned()
            .collect()
    }

    pub fn last_for(&self, user_id: &str) -> Option<OutgoingMessage> {
        self.messages_for(user_id).pop()
    }

    pub fn clear(&self) {
        lock(&self.sent).clear();
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: OutgoingMessage) -> Result<(), DeliveryError> {
        if lock(&self.unreachable).contains(&message.recipient) {
            return Err(DeliveryError::Unreachable(message.recipient));
        }
        lock(&self.sent).push(message);
        Ok(())
    }
}

/// Driver store whose availability writes always fail
pub struct BrokenAvailability {
    inner: Arc<dyn DriverRepository>,
}

impl BrokenAvailability {
    pub fn wrap(inner: Arc<dyn DriverRepository>) -> Arc<Self> {
        Arc::new(Self { inner })
    }
}

#[async_trait]
impl DriverRepository for BrokenAvailability {
    async fn get(&self, user_id: &str) -> StoreResult<Option<ActiveDriver>> {
        self.inner.get(user_id).await
    }

    async fn upsert(&self, driver: &ActiveDriver) -> StoreResult<()> {
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
        self.inner.touch_location(user_id, location, seen_at).await
    }

    async fn set_available(&self, user_id: &str, _available: bool) -> StoreResult<()> {
        Err(StoreError::Unavailable(format!("availability of {}", user_id)))
    }

    async fn list_available(&self, fresh_since: DateTime<Utc>) -> StoreResult<Vec<ActiveDriver>> {
        self.inner.list_available(fresh_since).await
    }

    async fn delete_stale(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        self.inner.delete_stale(before).await
    }
}

/// A clock that only moves when told to
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.advance(Duration::minutes(minutes));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

/// Fixed start time used by [`World`]
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Default pickup point used by the fixtures
pub fn pickup() -> Location {
    Location::new(41.3111, 69.2797)
}

/// A point `km` kilometres north of [`pickup`]
pub fn north_of_pickup(km: f64) -> Location {
    let origin = pickup();
    Location::new(origin.latitude + km / 111.195, origin.longitude)
}

/// Services wired to one in-memory store, a recording notifier and a
/// manual clock
pub struct World {
    pub store: Arc<MemoryStore>,
    pub stores: Stores,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
    pub rides: Arc<RideService>,
    pub accounts: Arc<AccountService>,
    pub maintenance: Arc<MaintenanceService>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    pub fn with_config(config: DispatchConfig) -> Self {
        Self::build(config, AdminPolicy::new(["1"]))
    }

    pub fn build(config: DispatchConfig, admins: AdminPolicy) -> Self {
        let store = Arc::new(MemoryStore::new());
        let stores = store.clone().into_stores();
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(ManualClock::new(epoch()));

        let rides = Arc::new(RideService::new(
            stores.clone(),
            notifier.clone(),
            clock.clone(),
            config.clone(),
        ));
        let accounts = Arc::new(AccountService::new(stores.clone(), clock.clone(), admins));
        let maintenance = Arc::new(MaintenanceService::new(
            stores.clone(),
            rides.clone(),
            clock.clone(),
            config,
        ));

        Self {
            store,
            stores,
            notifier,
            clock,
            rides,
            accounts,
            maintenance,
        }
    }

    async fn registered(&self, user_id: &str, role: Role) -> User {
        self.accounts
            .register_contact(user_id, &format!("User {user_id}"), None)
            .await
            .expect("register user");
        self.accounts
            .select_role(user_id, role)
            .await
            .expect("select role")
    }

    pub async fn customer(&self, user_id: &str) -> User {
        self.registered(user_id, Role::Customer).await
    }

    /// A driver on duty `km` kilometres north of the pickup point
    pub async fn driver_at(&self, user_id: &str, km: f64) -> ActiveDriver {
        self.registered(user_id, Role::Driver).await;
        self.accounts
            .start_duty(user_id, Some(format!("Car of {user_id}")))
            .await
            .expect("start duty");
        self.accounts
            .update_driver_location(user_id, north_of_pickup(km))
            .await
            .expect("driver location")
    }

    pub async fn user(&self, user_id: &str) -> User {
        self.stores
            .users
            .get(user_id)
            .await
            .expect("store")
            .expect("user exists")
    }
}
