//! Ride state machine
//!
//! ```text
//! PENDING -> ACCEPTED -> ON_THE_WAY -> IN_PROGRESS -> COMPLETED
//!    |           |            |             |
//!    +-----------+------------+-------------+--> CANCELLED
//!    +--> NO_DRIVERS (sweep only)
//! ```
//!
//! Every transition re-reads the ride and commits through
//! [`RideRepository::update_if_status`](crate::ports::RideRepository::update_if_status)
//! guarded by the status it read. Nothing is cached between calls, so any
//! number of service instances can handle events for the same ride.

use crate::{
    clock::Clock,
    config::DispatchConfig,
    error::{DispatchError, DispatchResult},
    matcher::{DriverMatcher, trip_distance_km},
    messages,
    models::{
        ActiveDriver, CancelParty, Location, RatingSide, Ride, RideClass, RideStatus, Role, User,
        UserId,
    },
    notify::{Notifier, deliver},
    ports::{StoreError, Stores},
};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Conditional writes attempted before reporting a conflict
const MAX_WRITE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct RideCreated {
    pub ride: Ride,
    /// Drivers that received the offer
    pub notified: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryOutcome {
    /// Gone, no longer pending, or not old enough
    Skipped,
    /// Drivers showed up meanwhile and got the offer again
    Reoffered(usize),
    /// Nobody is around; the ride was closed
    NoDrivers,
}

pub struct RideService {
    stores: Stores,
    matcher: DriverMatcher,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl RideService {
    pub fn new(
        stores: Stores,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: DispatchConfig,
    ) -> Self {
        let matcher = DriverMatcher::new(
            stores.drivers.clone(),
            notifier.clone(),
            clock.clone(),
            config.matcher.clone(),
            config.fares.clone(),
        );
        Self {
            stores,
            matcher,
            notifier,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    async fn load(&self, ride_id: &str) -> DispatchResult<Ride> {
        self.stores
            .rides
            .get(ride_id)
            .await?
            .ok_or_else(|| DispatchError::RideNotFound {
                ride_id: ride_id.to_string(),
            })
    }

    async fn require_role(&self, user_id: &str, role: Role) -> DispatchResult<User> {
        match self.stores.users.get(user_id).await? {
            Some(user) if user.has_role(role) => Ok(user),
            _ => Err(DispatchError::NotRegistered {
                user_id: user_id.to_string(),
            }),
        }
    }

    fn conflict(ride_id: &str) -> DispatchError {
        DispatchError::StoreUnavailable(StoreError::Conflict(format!("ride {}", ride_id)))
    }

    /// Open a ride request and offer it to nearby drivers
    pub async fn create_ride(
        &self,
        customer_id: &str,
        pickup: Location,
        ride_class: RideClass,
        destination: Option<Location>,
    ) -> DispatchResult<RideCreated> {
        self.require_role(customer_id, Role::Customer).await?;

        if !pickup.is_valid() || destination.is_some_and(|d| !d.is_valid()) {
            return Err(DispatchError::InvalidLocation);
        }

        if let Some(open) = self.stores.rides.open_for_customer(customer_id).await? {
            return Err(DispatchError::OpenRideExists { ride_id: open.id });
        }

        let ride = Ride::new(
            Uuid::new_v4().to_string(),
            customer_id,
            ride_class,
            pickup,
            destination,
            self.clock.now(),
        );
        self.stores.rides.insert(&ride).await?;
        info!("Ride {} created by {} ({})", ride.id, customer_id, ride_class);

        let candidates = self.matcher.find_candidates(&ride).await?;
        let notified = self.matcher.notify_candidates(&ride, &candidates).await;

        Ok(RideCreated { ride, notified })
    }

    /// Attach `driver_id` to a pending ride
    ///
    /// Of several drivers accepting the same ride exactly one succeeds; the
    /// others get [`DispatchError::RideNotPending`].
    pub async fn accept_ride(&self, ride_id: &str, driver_id: &str) -> DispatchResult<Ride> {
        let ride = self.load(ride_id).await?;
        if ride.status != RideStatus::Pending {
            return Err(DispatchError::RideNotPending {
                ride_id: ride.id,
                status: ride.status,
            });
        }

        let driver = self.require_role(driver_id, Role::Driver).await?;
        if let Some(open) = self.stores.rides.open_for_driver(driver_id).await? {
            return Err(DispatchError::DriverBusy { ride_id: open.id });
        }

        let active = self.stores.drivers.get(driver_id).await?;
        let distance = trip_distance_km(&ride, active.as_ref().and_then(|d| d.location));
        let fare = self.config.fares.estimate(distance, ride.ride_class);

        let mut accepted = ride.clone();
        accepted.status = RideStatus::Accepted;
        accepted.driver_id = Some(driver_id.to_string());
        accepted.fare = Some(fare);
        accepted.distance_km = Some(distance);
        accepted.accepted_at = Some(self.clock.now());

        if !self
            .stores
            .rides
            .update_if_status(&accepted, RideStatus::Pending)
            .await?
        {
            let status = self
                .stores
                .rides
                .get(ride_id)
                .await?
                .map(|r| r.status)
                .unwrap_or(RideStatus::Accepted);
            info!("Driver {} lost the race for ride {}", driver_id, ride_id);
            return Err(DispatchError::RideNotPending {
                ride_id: ride_id.to_string(),
                status,
            });
        }

        log_bookkeeping(
            ride_id,
            "mark the driver busy",
            self.stores.drivers.set_available(driver_id, false).await,
        );
        info!(
            "Ride {} accepted by {} for {:.2}",
            ride_id, driver_id, fare
        );

        let vehicle = active.as_ref().and_then(|d| d.vehicle.as_deref());
        deliver(
            self.notifier.as_ref(),
            messages::ride_accepted(&accepted, &driver, vehicle),
        )
        .await;
        deliver(
            self.notifier.as_ref(),
            messages::driver_controls(driver_id, &accepted),
        )
        .await;

        Ok(accepted)
    }

    /// A driver declined an offer; nothing changes
    pub async fn reject_ride(&self, ride_id: &str, driver_id: &str) -> DispatchResult<()> {
        let ride = self.load(ride_id).await?;
        info!(
            "Driver {} declined ride {} ({})",
            driver_id, ride.id, ride.status
        );
        Ok(())
    }

    /// Move the ride one step forward on behalf of its driver
    pub async fn advance_ride(
        &self,
        ride_id: &str,
        driver_id: &str,
        target: RideStatus,
    ) -> DispatchResult<Ride> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let ride = self.load(ride_id).await?;
            let Some(successor) = ride.status.driver_successor() else {
                return Err(DispatchError::InvalidTransition {
                    from: ride.status,
                    to: target,
                });
            };
            if ride.driver_id.as_deref() != Some(driver_id) {
                return Err(DispatchError::NotRideOwner { ride_id: ride.id });
            }
            if successor != target {
                return Err(DispatchError::InvalidTransition {
                    from: ride.status,
                    to: target,
                });
            }

            let now = self.clock.now();
            let mut advanced = ride.clone();
            advanced.status = target;
            match target {
                RideStatus::OnTheWay => advanced.on_the_way_at = Some(now),
                RideStatus::InProgress => advanced.started_at = Some(now),
                RideStatus::Completed => advanced.completed_at = Some(now),
                _ => {}
            }

            if self
                .stores
                .rides
                .update_if_status(&advanced, ride.status)
                .await?
            {
                info!("Ride {} is now {}", ride_id, target);
                self.after_advance(driver_id, &advanced).await;
                return Ok(advanced);
            }
        }

        Err(Self::conflict(ride_id))
    }

    async fn after_advance(&self, driver_id: &str, ride: &Ride) {
        if ride.status == RideStatus::Completed {
            let fare = ride.fare.unwrap_or_default();
            log_bookkeeping(
                &ride.id,
                "count the ride for the customer",
                self.stores.users.record_ride(&ride.customer_id, 0.0).await,
            );
            log_bookkeeping(
                &ride.id,
                "credit the driver",
                self.stores.users.record_ride(driver_id, fare).await,
            );
            log_bookkeeping(
                &ride.id,
                "free the driver",
                self.stores.drivers.set_available(driver_id, true).await,
            );

            deliver(self.notifier.as_ref(), messages::phase_update(ride)).await;
            deliver(
                self.notifier.as_ref(),
                messages::driver_completed(driver_id, ride),
            )
            .await;
        } else {
            deliver(self.notifier.as_ref(), messages::phase_update(ride)).await;
            deliver(
                self.notifier.as_ref(),
                messages::driver_controls(driver_id, ride),
            )
            .await;
        }
    }

    /// Cancel a ride on behalf of its customer or its driver
    ///
    /// Retries when the status moves underneath, so a cancel whose
    /// preconditions still hold goes through.
    pub async fn cancel_ride(&self, ride_id: &str, actor_id: &str) -> DispatchResult<Ride> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let ride = self.load(ride_id).await?;
            if ride.status.is_terminal() {
                return Err(DispatchError::RideNotPending {
                    ride_id: ride.id,
                    status: ride.status,
                });
            }

            let party = if ride.customer_id == actor_id {
                CancelParty::Customer
            } else if ride.driver_id.as_deref() == Some(actor_id) {
                CancelParty::Driver
            } else {
                return Err(DispatchError::NotRideOwner { ride_id: ride.id });
            };

            let mut cancelled = ride.clone();
            cancelled.status = RideStatus::Cancelled;
            cancelled.cancelled_at = Some(self.clock.now());
            cancelled.cancelled_by = Some(party);
            cancelled.cancelled_driver_id = cancelled.driver_id.take();

            if !self
                .stores
                .rides
                .update_if_status(&cancelled, ride.status)
                .await?
            {
                continue;
            }

            info!("Ride {} cancelled by the {}", ride_id, party);
            if let Some(driver_id) = &cancelled.cancelled_driver_id {
                log_bookkeeping(
                    ride_id,
                    "free the driver",
                    self.stores.drivers.set_available(driver_id, true).await,
                );
            }

            let counterpart: Option<UserId> = match party {
                CancelParty::Customer => cancelled.cancelled_driver_id.clone(),
                _ => Some(cancelled.customer_id.clone()),
            };
            if let Some(recipient) = counterpart {
                deliver(
                    self.notifier.as_ref(),
                    messages::ride_cancelled(&recipient, &cancelled),
                )
                .await;
            }
            return Ok(cancelled);
        }

        Err(Self::conflict(ride_id))
    }

    /// Cancel whatever ride the user currently has open
    pub async fn cancel_open_ride(&self, actor_id: &str) -> DispatchResult<Ride> {
        let open = self.open_ride(actor_id).await?.ok_or(DispatchError::NoOpenRide)?;
        self.cancel_ride(&open.id, actor_id).await
    }

    /// Give up on, or re-offer, a ride nobody accepted in time
    pub async fn expire_pending_ride(&self, ride_id: &str) -> DispatchResult<ExpiryOutcome> {
        let Some(ride) = self.stores.rides.get(ride_id).await? else {
            return Ok(ExpiryOutcome::Skipped);
        };
        if ride.status != RideStatus::Pending
            || self.clock.now() - ride.created_at < self.config.pending_timeout
        {
            return Ok(ExpiryOutcome::Skipped);
        }

        let candidates = self.matcher.find_candidates(&ride).await?;
        if !candidates.is_empty() {
            let notified = self.matcher.notify_candidates(&ride, &candidates).await;
            return Ok(ExpiryOutcome::Reoffered(notified));
        }

        let mut closed = ride.clone();
        closed.status = RideStatus::NoDrivers;
        if !self
            .stores
            .rides
            .update_if_status(&closed, RideStatus::Pending)
            .await?
        {
            return Ok(ExpiryOutcome::Skipped);
        }

        info!("Ride {} closed, no drivers available", ride_id);
        deliver(self.notifier.as_ref(), messages::no_drivers(&closed)).await;
        Ok(ExpiryOutcome::NoDrivers)
    }

    /// Rate the other party of a completed ride, once per side
    pub async fn rate_ride(&self, ride_id: &str, rater_id: &str, stars: u8) -> DispatchResult<()> {
        if !(1..=5).contains(&stars) {
            return Err(DispatchError::InvalidRating(stars));
        }

        let ride = self.load(ride_id).await?;
        if ride.status != RideStatus::Completed {
            return Err(DispatchError::RideNotCompleted { ride_id: ride.id });
        }

        let (side, rated) = if ride.customer_id == rater_id {
            (RatingSide::ByCustomer, ride.driver_id.clone())
        } else if ride.driver_id.as_deref() == Some(rater_id) {
            (RatingSide::ByDriver, Some(ride.customer_id.clone()))
        } else {
            return Err(DispatchError::NotRideOwner { ride_id: ride.id });
        };
        let Some(rated) = rated else {
            return Err(DispatchError::NotRideOwner { ride_id: ride.id });
        };

        if !self.stores.rides.set_rating(ride_id, side, stars).await? {
            warn!("Duplicate rating on ride {} by {}", ride_id, rater_id);
            return Err(DispatchError::AlreadyRated { ride_id: ride.id });
        }
        self.stores.users.add_rating(&rated, stars).await?;
        info!("{} rated {} with {} star(s)", rater_id, rated, stars);
        Ok(())
    }

    /// The user's unfinished ride, as customer or as driver
    pub async fn open_ride(&self, user_id: &str) -> DispatchResult<Option<Ride>> {
        if let Some(ride) = self.stores.rides.open_for_customer(user_id).await? {
            return Ok(Some(ride));
        }
        Ok(self.stores.rides.open_for_driver(user_id).await?)
    }

    /// Available drivers still inside the freshness window
    pub async fn available_drivers(&self) -> DispatchResult<Vec<ActiveDriver>> {
        let fresh_since = self.clock.now() - self.config.matcher.freshness;
        Ok(self.stores.drivers.list_available(fresh_since).await?)
    }

    pub async fn history(&self, user_id: &str) -> DispatchResult<Vec<Ride>> {
        Ok(self
            .stores
            .rides
            .history(user_id, self.config.history_limit)
            .await?)
    }
}

/// The ride change is already committed; a failed follow-up write is logged
/// and the flow carries on
fn log_bookkeeping(ride_id: &str, what: &str, result: Result<(), StoreError>) {
    if let Err(e) = result {
        error!("Ride {}: failed to {}: {}", ride_id, what, e);
    }
}
