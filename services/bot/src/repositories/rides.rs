//! Ride repository for database operations
//!
//! Status guards live in the `WHERE` clause of each update, so the accept
//! race is settled by PostgreSQL row locking.

use super::{corrupt, unavailable};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch::{
    models::{CancelParty, Location, RatingSide, Ride, RideClass, RideId, RideStats, RideStatus},
    ports::{self, StoreResult},
};
use sqlx::{PgPool, Row, postgres::PgRow};

const RIDE_COLUMNS: &str = "id, customer_id, driver_id, cancelled_driver_id, ride_class, \
     pickup_lat, pickup_lon, destination_lat, destination_lon, status, fare, distance_km, \
     created_at, accepted_at, on_the_way_at, started_at, completed_at, cancelled_at, \
     cancelled_by, customer_rating, driver_rating";

const OPEN_STATUSES: &str = "('pending', 'accepted', 'on_the_way', 'in_progress')";

#[derive(Clone)]
pub struct RideRepository {
    pool: PgPool,
}

impl RideRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_many(&self, sql: &str, user_id: Option<&str>, limit: usize) -> StoreResult<Vec<Ride>> {
        let limit = i64::try_from(limit).map_err(corrupt)?;
        let query = sqlx::query(sql);
        let query = match user_id {
            Some(user_id) => query.bind(user_id).bind(limit),
            None => query.bind(limit),
        };
        let rows = query.fetch_all(&self.pool).await.map_err(unavailable)?;
        rows.iter().map(ride_from_row).collect()
    }
}

fn rating_from_row(row: &PgRow, column: &str) -> StoreResult<Option<u8>> {
    let value: Option<i16> = row.try_get(column).map_err(unavailable)?;
    value.map(u8::try_from).transpose().map_err(corrupt)
}

fn ride_from_row(row: &PgRow) -> StoreResult<Ride> {
    let status: String = row.try_get("status").map_err(unavailable)?;
    let ride_class: String = row.try_get("ride_class").map_err(unavailable)?;
    let cancelled_by: Option<String> = row.try_get("cancelled_by").map_err(unavailable)?;
    let destination_lat: Option<f64> = row.try_get("destination_lat").map_err(unavailable)?;
    let destination_lon: Option<f64> = row.try_get("destination_lon").map_err(unavailable)?;

    Ok(Ride {
        id: row.try_get("id").map_err(unavailable)?,
        customer_id: row.try_get("customer_id").map_err(unavailable)?,
        driver_id: row.try_get("driver_id").map_err(unavailable)?,
        cancelled_driver_id: row.try_get("cancelled_driver_id").map_err(unavailable)?,
        ride_class: RideClass::parse_or_default(&ride_class),
        pickup: Location::new(
            row.try_get("pickup_lat").map_err(unavailable)?,
            row.try_get("pickup_lon").map_err(unavailable)?,
        ),
        destination: destination_lat
            .zip(destination_lon)
            .map(|(lat, lon)| Location::new(lat, lon)),
        status: status.parse::<RideStatus>().map_err(corrupt)?,
        fare: row.try_get("fare").map_err(unavailable)?,
        distance_km: row.try_get("distance_km").map_err(unavailable)?,
        created_at: row.try_get("created_at").map_err(unavailable)?,
        accepted_at: row.try_get("accepted_at").map_err(unavailable)?,
        on_the_way_at: row.try_get("on_the_way_at").map_err(unavailable)?,
        started_at: row.try_get("started_at").map_err(unavailable)?,
        completed_at: row.try_get("completed_at").map_err(unavailable)?,
        cancelled_at: row.try_get("cancelled_at").map_err(unavailable)?,
        cancelled_by: cancelled_by
            .map(|p| p.parse::<CancelParty>())
            .transpose()
            .map_err(corrupt)?,
        customer_rating: rating_from_row(row, "customer_rating")?,
        driver_rating: rating_from_row(row, "driver_rating")?,
    })
}

#[async_trait]
impl ports::RideRepository for RideRepository {
    async fn get(&self, id: &str) -> StoreResult<Option<Ride>> {
        let row = sqlx::query(&format!("SELECT {} FROM rides WHERE id = $1", RIDE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        row.as_ref().map(ride_from_row).transpose()
    }

    async fn insert(&self, ride: &Ride) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO rides (id, customer_id, ride_class, pickup_lat, pickup_lon,
                               destination_lat, destination_lon, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&ride.id)
        .bind(&ride.customer_id)
        .bind(ride.ride_class.as_str())
        .bind(ride.pickup.latitude)
        .bind(ride.pickup.longitude)
        .bind(ride.destination.map(|d| d.latitude))
        .bind(ride.destination.map(|d| d.longitude))
        .bind(ride.status.as_str())
        .bind(ride.created_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    async fn update_if_status(&self, ride: &Ride, expected: RideStatus) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE rides SET
                driver_id = $3,
                cancelled_driver_id = $4,
                status = $5,
                fare = $6,
                distance_km = $7,
                accepted_at = $8,
                on_the_way_at = $9,
                started_at = $10,
                completed_at = $11,
                cancelled_at = $12,
                cancelled_by = $13
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(&ride.id)
        .bind(expected.as_str())
        .bind(&ride.driver_id)
        .bind(&ride.cancelled_driver_id)
        .bind(ride.status.as_str())
        .bind(ride.fare)
        .bind(ride.distance_km)
        .bind(ride.accepted_at)
        .bind(ride.on_the_way_at)
        .bind(ride.started_at)
        .bind(ride.completed_at)
        .bind(ride.cancelled_at)
        .bind(ride.cancelled_by.map(|p| p.as_str()))
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_rating(&self, id: &str, side: RatingSide, stars: u8) -> StoreResult<bool> {
        let sql = match side {
            RatingSide::ByCustomer => {
                "UPDATE rides SET customer_rating = $2 \
                 WHERE id = $1 AND status = 'completed' AND customer_rating IS NULL"
            }
            RatingSide::ByDriver => {
                "UPDATE rides SET driver_rating = $2 \
                 WHERE id = $1 AND status = 'completed' AND driver_rating IS NULL"
            }
        };
        let result = sqlx::query(sql)
            .bind(id)
            .bind(i16::from(stars))
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        Ok(result.rows_affected() == 1)
    }

    async fn open_for_customer(&self, customer_id: &str) -> StoreResult<Option<Ride>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM rides WHERE customer_id = $1 AND status IN {} \
             ORDER BY created_at DESC LIMIT 1",
            RIDE_COLUMNS, OPEN_STATUSES
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.as_ref().map(ride_from_row).transpose()
    }

    async fn open_for_driver(&self, driver_id: &str) -> StoreResult<Option<Ride>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM rides WHERE driver_id = $1 AND status IN {} \
             ORDER BY created_at DESC LIMIT 1",
            RIDE_COLUMNS, OPEN_STATUSES
        ))
        .bind(driver_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.as_ref().map(ride_from_row).transpose()
    }

    async fn pending_before(&self, before: DateTime<Utc>) -> StoreResult<Vec<RideId>> {
        let rows = sqlx::query(
            "SELECT id FROM rides WHERE status = 'pending' AND created_at < $1 ORDER BY created_at",
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.iter()
            .map(|row| row.try_get("id").map_err(unavailable))
            .collect()
    }

    async fn history(&self, user_id: &str, limit: usize) -> StoreResult<Vec<Ride>> {
        let sql = format!(
            "SELECT {} FROM rides \
             WHERE customer_id = $1 OR driver_id = $1 OR cancelled_driver_id = $1 \
             ORDER BY created_at DESC LIMIT $2",
            RIDE_COLUMNS
        );
        self.fetch_many(&sql, Some(user_id), limit).await
    }

    async fn recent(&self, limit: usize) -> StoreResult<Vec<Ride>> {
        let sql = format!(
            "SELECT {} FROM rides ORDER BY created_at DESC LIMIT $1",
            RIDE_COLUMNS
        );
        self.fetch_many(&sql, None, limit).await
    }

    async fn stats(&self) -> StoreResult<RideStats> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n, COALESCE(SUM(fare), 0) AS revenue \
             FROM rides GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let mut stats = RideStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(unavailable)?;
            let status = status.parse::<RideStatus>().map_err(corrupt)?;
            let n: i64 = row.try_get("n").map_err(unavailable)?;
            let n = u64::try_from(n).map_err(corrupt)?;
            if status == RideStatus::Completed {
                stats.completed_revenue = row.try_get("revenue").map_err(unavailable)?;
            }
            stats.total += n;
            stats.by_status.push((status, n));
        }
        stats.by_status.sort_by_key(|(status, _)| *status);
        Ok(stats)
    }

    async fn delete_terminal_before(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM rides \
             WHERE status IN ('completed', 'cancelled', 'no_drivers') AND created_at < $1",
        )
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_pool;
    use dispatch::ports::{RideRepository as _, StoreError};
    use std::error::Error;
    use uuid::Uuid;

    async fn pending_ride(repo: &RideRepository) -> Result<Ride, Box<dyn Error>> {
        let ride = Ride::new(
            Uuid::new_v4().to_string(),
            "it-customer",
            RideClass::Comfort,
            Location::new(41.3111, 69.2797),
            Some(Location::new(41.33, 69.28)),
            Utc::now(),
        );
        repo.insert(&ride).await?;
        Ok(ride)
    }

    fn accepted_by(ride: &Ride, driver_id: &str) -> Ride {
        let mut accepted = ride.clone();
        accepted.status = RideStatus::Accepted;
        accepted.driver_id = Some(driver_id.to_string());
        accepted.fare = Some(12.5);
        accepted.distance_km = Some(2.1);
        accepted.accepted_at = Some(Utc::now());
        accepted
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL"]
    async fn conditional_update_admits_one_writer() -> Result<(), Box<dyn Error>> {
        let repo = RideRepository::new(test_pool().await?);
        let ride = pending_ride(&repo).await?;

        let first = accepted_by(&ride, "it-driver-1");
        let second = accepted_by(&ride, "it-driver-2");
        let (a, b) = tokio::join!(
            repo.update_if_status(&first, RideStatus::Pending),
            repo.update_if_status(&second, RideStatus::Pending),
        );
        let (a, b) = (a?, b?);
        assert!(a ^ b, "exactly one accept must win, got {} and {}", a, b);

        let stored = repo.get(&ride.id).await?.ok_or("ride vanished")?;
        let winner = if a { "it-driver-1" } else { "it-driver-2" };
        assert_eq!(stored.status, RideStatus::Accepted);
        assert_eq!(stored.driver_id.as_deref(), Some(winner));
        assert_eq!(stored.fare, Some(12.5));
        assert_eq!(stored.ride_class, RideClass::Comfort);

        let mut cancelled = stored.clone();
        cancelled.status = RideStatus::Cancelled;
        cancelled.cancelled_by = Some(CancelParty::Customer);
        cancelled.cancelled_driver_id = cancelled.driver_id.take();
        assert!(!repo.update_if_status(&cancelled, RideStatus::Pending).await?);
        assert!(repo.update_if_status(&cancelled, RideStatus::Accepted).await?);
        let stored = repo.get(&ride.id).await?.ok_or("ride vanished")?;
        assert_eq!(stored.cancelled_by, Some(CancelParty::Customer));
        assert_eq!(stored.cancelled_driver_id.as_deref(), Some(winner));
        Ok(())
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL"]
    async fn rating_slots_are_write_once() -> Result<(), Box<dyn Error>> {
        let repo = RideRepository::new(test_pool().await?);
        let ride = pending_ride(&repo).await?;
        assert!(!repo.set_rating(&ride.id, RatingSide::ByCustomer, 5).await?);

        let accepted = accepted_by(&ride, "it-driver-1");
        assert!(repo.update_if_status(&accepted, RideStatus::Pending).await?);
        let mut completed = accepted.clone();
        completed.status = RideStatus::Completed;
        completed.completed_at = Some(Utc::now());
        assert!(repo.update_if_status(&completed, RideStatus::Accepted).await?);

        assert!(repo.set_rating(&ride.id, RatingSide::ByCustomer, 4).await?);
        assert!(!repo.set_rating(&ride.id, RatingSide::ByCustomer, 1).await?);
        assert!(repo.set_rating(&ride.id, RatingSide::ByDriver, 5).await?);

        let stored = repo.get(&ride.id).await?.ok_or("ride vanished")?;
        assert_eq!(stored.customer_rating, Some(4));
        assert_eq!(stored.driver_rating, Some(5));
        Ok(())
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL"]
    async fn schema_rejects_driver_status_mismatch() -> Result<(), Box<dyn Error>> {
        let repo = RideRepository::new(test_pool().await?);
        let ride = pending_ride(&repo).await?;

        let mut driverless = accepted_by(&ride, "it-driver-1");
        driverless.driver_id = None;
        let result = repo.update_if_status(&driverless, RideStatus::Pending).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));

        let stored = repo.get(&ride.id).await?.ok_or("ride vanished")?;
        assert_eq!(stored.status, RideStatus::Pending);
        assert_eq!(stored.driver_id, None);
        Ok(())
    }
}
