//! Driver selection and ride offers

use crate::{
    clock::Clock,
    config::MatcherConfig,
    fare::FareTable,
    geo,
    messages,
    models::{ActiveDriver, Location, Ride},
    notify::{Notifier, deliver},
    ports::{DriverRepository, StoreResult},
};
use std::sync::Arc;
use tracing::{debug, info};

/// A driver close enough to be offered the ride
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub driver: ActiveDriver,
    /// Distance from the driver to the pickup point
    pub pickup_km: f64,
}

/// Distance the fare is charged on
///
/// Pickup to destination when the customer gave one, otherwise the distance
/// the driver covers to reach the pickup point.
pub fn trip_distance_km(ride: &Ride, driver_location: Option<Location>) -> f64 {
    match (ride.destination, driver_location) {
        (Some(destination), _) => geo::distance_km(ride.pickup, destination),
        (None, Some(driver)) => geo::distance_km(driver, ride.pickup),
        (None, None) => 0.0,
    }
}

pub struct DriverMatcher {
    drivers: Arc<dyn DriverRepository>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: MatcherConfig,
    fares: FareTable,
}

impl DriverMatcher {
    pub fn new(
        drivers: Arc<dyn DriverRepository>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: MatcherConfig,
        fares: FareTable,
    ) -> Self {
        Self {
            drivers,
            notifier,
            clock,
            config,
            fares,
        }
    }

    /// Available, recently active drivers within range, closest first
    pub async fn find_candidates(&self, ride: &Ride) -> StoreResult<Vec<Candidate>> {
        let fresh_since = self.clock.now() - self.config.freshness;
        let available = self.drivers.list_available(fresh_since).await?;

        let mut candidates: Vec<Candidate> = available
            .into_iter()
            .filter(|d| d.user_id != ride.customer_id)
            .filter_map(|driver| {
                let location = driver.location?;
                let pickup_km = geo::distance_km(location, ride.pickup);
                (pickup_km <= self.config.max_radius_km).then_some(Candidate { driver, pickup_km })
            })
            .collect();

        candidates.sort_by(|a, b| a.pickup_km.total_cmp(&b.pickup_km));
        candidates.truncate(self.config.max_candidates);

        debug!(
            "Ride {} has {} candidate driver(s)",
            ride.id,
            candidates.len()
        );
        Ok(candidates)
    }

    /// Send the offer to every candidate; returns how many were reached
    pub async fn notify_candidates(&self, ride: &Ride, candidates: &[Candidate]) -> usize {
        let mut notified = 0;
        for candidate in candidates {
            let distance = trip_distance_km(ride, candidate.driver.location);
            let fare = self.fares.estimate(distance, ride.ride_class);
            let offer = messages::ride_offer(
                &candidate.driver.user_id,
                ride,
                fare,
                candidate.pickup_km,
            );
            if deliver(self.notifier.as_ref(), offer).await {
                notified += 1;
            }
        }

        info!(
            "Offered ride {} to {}/{} driver(s)",
            ride.id,
            notified,
            candidates.len()
        );
        notified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        memory::MemoryStore,
        models::RideClass,
        testing::{ManualClock, RecordingNotifier},
    };
    use chrono::{Duration, TimeZone, Utc};

    const PICKUP: Location = Location {
        latitude: 41.3111,
        longitude: 69.2797,
    };

    struct Fixture {
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<ManualClock>,
        matcher: DriverMatcher,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        ));
        let matcher = DriverMatcher::new(
            store.clone(),
            notifier.clone(),
            clock.clone(),
            MatcherConfig::default(),
            FareTable::default(),
        );
        Fixture {
            store,
            notifier,
            clock,
            matcher,
        }
    }

    /// Driver `km_north` kilometres north of the pickup
    async fn driver(f: &Fixture, id: &str, km_north: Option<f64>, idle_minutes: i64) {
        let location = km_north.map(|km| Location::new(PICKUP.latitude + km / 111.195, PICKUP.longitude));
        let record = ActiveDriver {
            user_id: id.to_string(),
            display_name: id.to_string(),
            vehicle: None,
            location,
            is_available: true,
            last_active: f.clock.now() - Duration::minutes(idle_minutes),
        };
        DriverRepository::upsert(f.store.as_ref(), &record).await.unwrap();
    }

    fn ride(f: &Fixture) -> Ride {
        Ride::new("r1", "c1", RideClass::Economy, PICKUP, None, f.clock.now())
    }

    #[tokio::test]
    async fn closest_fresh_drivers_within_radius() {
        let f = fixture();
        driver(&f, "far", Some(12.0), 0).await;
        driver(&f, "near", Some(1.0), 0).await;
        driver(&f, "mid", Some(4.0), 1).await;
        driver(&f, "stale", Some(0.5), 6).await;
        driver(&f, "nowhere", None, 0).await;

        let candidates = f.matcher.find_candidates(&ride(&f)).await.unwrap();
        let ids: Vec<_> = candidates.iter().map(|c| c.driver.user_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert!((candidates[0].pickup_km - 1.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn unavailable_drivers_are_skipped() {
        let f = fixture();
        driver(&f, "busy", Some(1.0), 0).await;
        f.store.set_available("busy", false).await.unwrap();

        assert!(f.matcher.find_candidates(&ride(&f)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn candidate_list_is_capped() {
        let f = fixture();
        for i in 0..60 {
            driver(&f, &format!("d{i}"), Some(0.1 * f64::from(i)), 0).await;
        }

        let candidates = f.matcher.find_candidates(&ride(&f)).await.unwrap();
        assert_eq!(candidates.len(), 50);
        assert!(candidates.windows(2).all(|w| w[0].pickup_km <= w[1].pickup_km));
    }

    #[tokio::test]
    async fn failed_deliveries_are_not_counted() {
        let f = fixture();
        driver(&f, "d1", Some(1.0), 0).await;
        driver(&f, "d2", Some(2.0), 0).await;
        f.notifier.fail_for("d1");

        let ride = ride(&f);
        let candidates = f.matcher.find_candidates(&ride).await.unwrap();
        assert_eq!(f.matcher.notify_candidates(&ride, &candidates).await, 1);

        let offers = f.notifier.messages_for("d2");
        assert_eq!(offers.len(), 1);
        // 2 km to pickup: 5 + 4 + 2
        assert!(offers[0].text.contains("$11.00"));
    }

    #[test]
    fn trip_distance_prefers_destination() {
        let destination = Location::new(PICKUP.latitude + 0.1, PICKUP.longitude);
        let mut ride = Ride::new("r", "c", RideClass::Economy, PICKUP, None, Utc::now());
        let driver_at = Some(Location::new(PICKUP.latitude + 0.01, PICKUP.longitude));

        let to_pickup = trip_distance_km(&ride, driver_at);
        assert!((to_pickup - 1.112).abs() < 0.01);

        ride.destination = Some(destination);
        let trip = trip_distance_km(&ride, driver_at);
        assert!((trip - 11.12).abs() < 0.01);

        ride.destination = None;
        assert_eq!(trip_distance_km(&ride, None), 0.0);
    }
}
