//! Periodic maintenance
//!
//! Each operation is one pass, meant to be driven by a scheduler. They are
//! safe to run concurrently with live traffic.

use crate::{
    clock::Clock,
    config::DispatchConfig,
    error::DispatchResult,
    lifecycle::{ExpiryOutcome, RideService},
    ports::Stores,
};
use std::sync::Arc;
use tracing::{error, info};

/// What one pending-ride pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryReport {
    pub examined: usize,
    pub closed: usize,
    pub reoffered: usize,
    pub failed: usize,
}

pub struct MaintenanceService {
    stores: Stores,
    rides: Arc<RideService>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl MaintenanceService {
    pub fn new(
        stores: Stores,
        rides: Arc<RideService>,
        clock: Arc<dyn Clock>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            stores,
            rides,
            clock,
            config,
        }
    }

    /// Close or re-offer every pending ride past the timeout
    pub async fn expire_pending_rides(&self) -> DispatchResult<ExpiryReport> {
        let due_before = self.clock.now() - self.config.pending_timeout;
        let due = self.stores.rides.pending_before(due_before).await?;

        let mut report = ExpiryReport {
            examined: due.len(),
            ..ExpiryReport::default()
        };
        for ride_id in due {
            match self.rides.expire_pending_ride(&ride_id).await {
                Ok(ExpiryOutcome::NoDrivers) => report.closed += 1,
                Ok(ExpiryOutcome::Reoffered(_)) => report.reoffered += 1,
                Ok(ExpiryOutcome::Skipped) => {}
                Err(e) => {
                    error!("Failed to expire ride {}: {}", ride_id, e);
                    report.failed += 1;
                }
            }
        }

        if report.examined > 0 {
            info!(
                "Pending sweep: {} examined, {} closed, {} re-offered, {} failed",
                report.examined, report.closed, report.reoffered, report.failed
            );
        }
        Ok(report)
    }

    /// Take drivers that stopped pinging off duty
    pub async fn purge_stale_drivers(&self) -> DispatchResult<u64> {
        let before = self.clock.now() - self.config.driver_stale_after;
        let removed = self.stores.drivers.delete_stale(before).await?;
        if removed > 0 {
            info!("Removed {} stale driver(s)", removed);
        }
        Ok(removed)
    }

    /// Delete finished rides past the retention window
    pub async fn purge_archived_rides(&self) -> DispatchResult<u64> {
        let before = self.clock.now() - self.config.ride_retention;
        let removed = self.stores.rides.delete_terminal_before(before).await?;
        if removed > 0 {
            info!("Deleted {} archived ride(s)", removed);
        }
        Ok(removed)
    }

    /// Delete users gone quiet for longer than the inactivity window
    pub async fn purge_inactive_users(&self) -> DispatchResult<u64> {
        let before = self.clock.now() - self.config.user_inactivity;
        let removed = self.stores.users.delete_inactive(before).await?;
        if removed > 0 {
            info!("Deleted {} inactive user(s)", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        models::{RideClass, RideStatus},
        testing::{World, pickup},
    };
    use chrono::Duration;

    #[tokio::test]
    async fn pending_rides_close_after_the_timeout() {
        let world = World::new();
        world.customer("c1").await;
        let created = world
            .rides
            .create_ride("c1", pickup(), RideClass::Economy, None)
            .await
            .unwrap();

        world.clock.advance_minutes(29);
        let early = world.maintenance.expire_pending_rides().await.unwrap();
        assert_eq!(early.examined, 0);

        world.clock.advance_minutes(2);
        let report = world.maintenance.expire_pending_rides().await.unwrap();
        assert_eq!(report.closed, 1);

        let ride = world.stores.rides.get(&created.ride.id).await.unwrap().unwrap();
        assert_eq!(ride.status, RideStatus::NoDrivers);
        assert_eq!(ride.fare, None);
        assert_eq!(ride.driver_id, None);
        assert!(world.notifier.last_for("c1").unwrap().text.contains("No driver"));
    }

    #[tokio::test]
    async fn late_drivers_get_the_offer_again() {
        let world = World::new();
        world.customer("c1").await;
        world
            .rides
            .create_ride("c1", pickup(), RideClass::Economy, None)
            .await
            .unwrap();

        world.clock.advance_minutes(31);
        world.driver_at("d1", 2.0).await;

        let report = world.maintenance.expire_pending_rides().await.unwrap();
        assert_eq!(report.reoffered, 1);
        assert_eq!(world.notifier.messages_for("d1").len(), 1);
    }

    #[tokio::test]
    async fn stale_drivers_are_removed() {
        let world = World::new();
        world.driver_at("d1", 1.0).await;
        world.clock.advance_minutes(30);
        world.driver_at("d2", 1.0).await;
        world.clock.advance_minutes(31);

        assert_eq!(world.maintenance.purge_stale_drivers().await.unwrap(), 1);
        assert!(world.stores.drivers.get("d1").await.unwrap().is_none());
        assert!(world.stores.drivers.get("d2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn retention_keeps_open_and_recent_rides() {
        let world = World::new();
        world.customer("old").await;
        world.customer("open").await;
        let old = world
            .rides
            .create_ride("old", pickup(), RideClass::Economy, None)
            .await
            .unwrap();
        world.rides.cancel_ride(&old.ride.id, "old").await.unwrap();
        let open = world
            .rides
            .create_ride("open", pickup(), RideClass::Economy, None)
            .await
            .unwrap();

        world.clock.advance(Duration::days(31));
        assert_eq!(world.maintenance.purge_archived_rides().await.unwrap(), 1);
        assert!(world.stores.rides.get(&open.ride.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn inactive_users_are_deleted() {
        let world = World::new();
        world.customer("quiet").await;
        world.clock.advance(Duration::days(91));
        world.customer("recent").await;

        assert_eq!(world.maintenance.purge_inactive_users().await.unwrap(), 1);
        assert!(world.stores.users.get("quiet").await.unwrap().is_none());
    }
}
