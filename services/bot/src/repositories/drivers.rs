//! Driver repository for database operations

use super::unavailable;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch::{
    models::{ActiveDriver, Location},
    ports::{self, StoreResult},
};
use sqlx::{PgPool, Row, postgres::PgRow};

const DRIVER_COLUMNS: &str =
    "user_id, display_name, vehicle, latitude, longitude, is_available, last_active";

#[derive(Clone)]
pub struct DriverRepository {
    pool: PgPool,
}

impl DriverRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn driver_from_row(row: &PgRow) -> StoreResult<ActiveDriver> {
    let latitude: Option<f64> = row.try_get("latitude").map_err(unavailable)?;
    let longitude: Option<f64> = row.try_get("longitude").map_err(unavailable)?;

    Ok(ActiveDriver {
        user_id: row.try_get("user_id").map_err(unavailable)?,
        display_name: row.try_get("display_name").map_err(unavailable)?,
        vehicle: row.try_get("vehicle").map_err(unavailable)?,
        location: latitude
            .zip(longitude)
            .map(|(lat, lon)| Location::new(lat, lon)),
        is_available: row.try_get("is_available").map_err(unavailable)?,
        last_active: row.try_get("last_active").map_err(unavailable)?,
    })
}

#[async_trait]
impl ports::DriverRepository for DriverRepository {
    async fn get(&self, user_id: &str) -> StoreResult<Option<ActiveDriver>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM active_drivers WHERE user_id = $1",
            DRIVER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.as_ref().map(driver_from_row).transpose()
    }

    async fn upsert(&self, driver: &ActiveDriver) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO active_drivers (user_id, display_name, vehicle, latitude, longitude,
                                        is_available, last_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                vehicle = EXCLUDED.vehicle,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                is_available = EXCLUDED.is_available,
                last_active = EXCLUDED.last_active
            "#,
        )
        .bind(&driver.user_id)
        .bind(&driver.display_name)
        .bind(&driver.vehicle)
        .bind(driver.location.map(|l| l.latitude))
        .bind(driver.location.map(|l| l.longitude))
        .bind(driver.is_available)
        .bind(driver.last_active)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    async fn delete(&self, user_id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM active_drivers WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        Ok(result.rows_affected() > 0)
    }

    async fn touch_location(
        &self,
        user_id: &str,
        location: Location,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE active_drivers SET latitude = $2, longitude = $3, last_active = $4 \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(seen_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_available(&self, user_id: &str, available: bool) -> StoreResult<()> {
        sqlx::query("UPDATE active_drivers SET is_available = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(available)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn list_available(&self, fresh_since: DateTime<Utc>) -> StoreResult<Vec<ActiveDriver>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM active_drivers WHERE is_available AND last_active >= $1",
            DRIVER_COLUMNS
        ))
        .bind(fresh_since)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.iter().map(driver_from_row).collect()
    }

    async fn delete_stale(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM active_drivers WHERE last_active < $1")
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        Ok(result.rows_affected())
    }
}
