//! User repository for database operations

use super::{corrupt, unavailable};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch::{
    models::{Role, RoleCounts, User},
    ports::{self, StoreResult},
};
use sqlx::{PgPool, Row, postgres::PgRow};

const USER_COLUMNS: &str = "id, display_name, username, role, balance, rating, rating_count, \
                            total_rides, created_at, last_seen";

#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn user_from_row(row: &PgRow) -> StoreResult<User> {
    let role: Option<String> = row.try_get("role").map_err(unavailable)?;
    let rating_count: i32 = row.try_get("rating_count").map_err(unavailable)?;
    let total_rides: i32 = row.try_get("total_rides").map_err(unavailable)?;

    Ok(User {
        id: row.try_get("id").map_err(unavailable)?,
        display_name: row.try_get("display_name").map_err(unavailable)?,
        username: row.try_get("username").map_err(unavailable)?,
        role: role
            .map(|r| r.parse::<Role>())
            .transpose()
            .map_err(corrupt)?,
        balance: row.try_get("balance").map_err(unavailable)?,
        rating: row.try_get("rating").map_err(unavailable)?,
        rating_count: u32::try_from(rating_count).map_err(corrupt)?,
        total_rides: u32::try_from(total_rides).map_err(corrupt)?,
        created_at: row.try_get("created_at").map_err(unavailable)?,
        last_seen: row.try_get("last_seen").map_err(unavailable)?,
    })
}

#[async_trait]
impl ports::UserRepository for UserRepository {
    async fn get(&self, id: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn upsert(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, display_name, username, role, balance, rating, rating_count,
                               total_rides, created_at, last_seen)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                username = EXCLUDED.username,
                role = EXCLUDED.role,
                balance = EXCLUDED.balance,
                rating = EXCLUDED.rating,
                rating_count = EXCLUDED.rating_count,
                total_rides = EXCLUDED.total_rides,
                last_seen = EXCLUDED.last_seen
            "#,
        )
        .bind(&user.id)
        .bind(&user.display_name)
        .bind(&user.username)
        .bind(user.role.map(|r| r.as_str()))
        .bind(user.balance)
        .bind(user.rating)
        .bind(i32::try_from(user.rating_count).map_err(corrupt)?)
        .bind(i32::try_from(user.total_rides).map_err(corrupt)?)
        .bind(user.created_at)
        .bind(user.last_seen)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    async fn touch(
        &self,
        id: &str,
        display_name: &str,
        username: Option<&str>,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE users SET display_name = $2, username = $3, last_seen = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(display_name)
        .bind(username)
        .bind(seen_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_role(&self, id: &str, role: Role) -> StoreResult<()> {
        sqlx::query("UPDATE users SET role = $2 WHERE id = $1")
            .bind(id)
            .bind(role.as_str())
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn record_ride(&self, id: &str, credit: f64) -> StoreResult<()> {
        sqlx::query(
            "UPDATE users SET total_rides = total_rides + 1, balance = balance + $2 WHERE id = $1",
        )
        .bind(id)
        .bind(credit.max(0.0))
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn add_rating(&self, id: &str, stars: u8) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET rating = (rating * rating_count + $2) / (rating_count + 1),
                rating_count = rating_count + 1
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(f64::from(stars))
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn delete_inactive(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM users u
            WHERE u.last_seen < $1
              AND NOT EXISTS (
                  SELECT 1 FROM rides r
                  WHERE (r.customer_id = u.id OR r.driver_id = u.id)
                    AND r.status IN ('pending', 'accepted', 'on_the_way', 'in_progress')
              )
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(result.rows_affected())
    }

    async fn role_counts(&self) -> StoreResult<RoleCounts> {
        let rows = sqlx::query("SELECT role, COUNT(*) AS n FROM users GROUP BY role")
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;

        let mut counts = RoleCounts::default();
        for row in rows {
            let role: Option<String> = row.try_get("role").map_err(unavailable)?;
            let n: i64 = row.try_get("n").map_err(unavailable)?;
            let n = u64::try_from(n).map_err(corrupt)?;
            match role.as_deref().map(str::parse::<Role>).transpose().map_err(corrupt)? {
                Some(Role::Customer) => counts.customers += n,
                Some(Role::Driver) => counts.drivers += n,
                Some(Role::Admin) => counts.admins += n,
                None => counts.unassigned += n,
            }
        }
        Ok(counts)
    }
}
