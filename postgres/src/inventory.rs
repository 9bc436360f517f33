//! `PostgreSQL` inventory record store.

use crate::store_failure;
use chrono::NaiveDate;
use coupon_inventory_core::error::{InventoryError, Result};
use coupon_inventory_core::inventory::{Counter, InventoryRecord};
use coupon_inventory_core::store::{Decrement, InventoryStore, StoreFuture};
use coupon_inventory_core::types::{CouponId, InventoryId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const STORE: &str = "inventory";

/// `PostgreSQL`-backed [`InventoryStore`].
///
/// The claim's compare-and-decrement is a single `UPDATE` whose `WHERE`
/// clause carries the expected counter, so the row lock Postgres takes for the
/// update is the only serialisation point between concurrent claims.
///
/// # Example
///
/// ```no_run
/// use coupon_inventory_postgres::PostgresInventoryStore;
/// use coupon_inventory_core::store::InventoryStore;
/// use coupon_inventory_core::types::CouponId;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresInventoryStore::new(pool);
/// store.create(CouponId::new(7), 100).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn unavailable(operation: &'static str, error: &sqlx::Error) -> InventoryError {
        InventoryError::StoreUnavailable(store_failure(STORE, operation, error))
    }

    fn corrupt(coupon_id: CouponId, column: &str) -> InventoryError {
        InventoryError::StoreUnavailable(format!("Invalid {column} stored for coupon {coupon_id}"))
    }

    fn row_to_record(row: &PgRow) -> Result<InventoryRecord> {
        let read = |e: sqlx::Error| Self::unavailable("decode", &e);
        let coupon_id = CouponId::new(row.try_get("coupon_id").map_err(read)?);
        let daily_limit: i64 = row.try_get("daily_limit").map_err(read)?;
        let available_today: i64 = row.try_get("available_today").map_err(read)?;
        let available_today = u32::try_from(available_today)
            .map_err(|_| Self::corrupt(coupon_id, "available_today"))?;

        InventoryRecord::from_parts(
            InventoryId::new(row.try_get("inventory_id").map_err(read)?),
            coupon_id,
            u32::try_from(daily_limit).map_err(|_| Self::corrupt(coupon_id, "daily_limit"))?,
            Counter::new(
                available_today,
                row.try_get("last_reset_date").map_err(read)?,
            ),
        )
    }

    async fn exists(&self, coupon_id: CouponId) -> Result<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM coupon_inventory WHERE coupon_id = $1)")
            .bind(coupon_id.get())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Self::unavailable("exists", &e))
    }

    async fn fetch(&self, coupon_id: CouponId) -> Result<InventoryRecord> {
        let row = sqlx::query(
            r"
            SELECT inventory_id, coupon_id, daily_limit, available_today, last_reset_date
            FROM coupon_inventory
            WHERE coupon_id = $1
            ",
        )
        .bind(coupon_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Self::unavailable("get", &e))?
        .ok_or(InventoryError::NotFound(coupon_id))?;

        Self::row_to_record(&row)
    }

    async fn insert(&self, coupon_id: CouponId, daily_limit: u32) -> Result<InventoryRecord> {
        let row = sqlx::query(
            r"
            INSERT INTO coupon_inventory (coupon_id, daily_limit, available_today, last_reset_date)
            VALUES ($1, $2, 0, NULL)
            RETURNING inventory_id, coupon_id, daily_limit, available_today, last_reset_date
            ",
        )
        .bind(coupon_id.get())
        .bind(i64::from(daily_limit))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if crate::is_unique_violation(&e) {
                InventoryError::AlreadyExists(coupon_id)
            } else {
                Self::unavailable("create", &e)
            }
        })?;

        tracing::info!(%coupon_id, daily_limit, "Inventory record created");
        Self::row_to_record(&row)
    }

    async fn decrement(
        &self,
        coupon_id: CouponId,
        expected: Counter,
        today: NaiveDate,
    ) -> Result<Decrement> {
        // $4 is today: a counter from an earlier day is refilled to the
        // limit before the unit is taken, in the same statement.
        let result = sqlx::query(
            r"
            UPDATE coupon_inventory
            SET available_today = (
                    CASE WHEN last_reset_date IS NULL OR last_reset_date < $4
                        THEN daily_limit ELSE available_today END
                ) - 1,
                last_reset_date = CASE
                    WHEN last_reset_date IS NULL OR last_reset_date < $4 THEN $4
                    ELSE last_reset_date
                END
            WHERE coupon_id = $1
              AND available_today = $2
              AND last_reset_date IS NOT DISTINCT FROM $3
              AND (
                    CASE WHEN last_reset_date IS NULL OR last_reset_date < $4
                        THEN daily_limit ELSE available_today END
                ) > 0
            ",
        )
        .bind(coupon_id.get())
        .bind(i64::from(expected.available_today))
        .bind(expected.last_reset_date)
        .bind(today)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::unavailable("compare_and_decrement", &e))?;

        if result.rows_affected() == 1 {
            return Ok(Decrement::Applied);
        }
        if self.exists(coupon_id).await? {
            Ok(Decrement::Conflict)
        } else {
            Err(InventoryError::NotFound(coupon_id))
        }
    }

    async fn release(&self, coupon_id: CouponId, today: NaiveDate) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE coupon_inventory
            SET available_today = available_today + 1
            WHERE coupon_id = $1
              AND last_reset_date = $2
              AND available_today < daily_limit
            ",
        )
        .bind(coupon_id.get())
        .bind(today)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::unavailable("release_one", &e))?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if self.exists(coupon_id).await? {
            Ok(false)
        } else {
            Err(InventoryError::NotFound(coupon_id))
        }
    }

    async fn count_due(&self, today: NaiveDate) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM coupon_inventory
            WHERE last_reset_date IS NULL OR last_reset_date < $1
            ",
        )
        .bind(today)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Self::unavailable("count_due_for_reset", &e))?;

        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn refill_all(&self, today: NaiveDate) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE coupon_inventory
            SET available_today = daily_limit,
                last_reset_date = $1
            WHERE last_reset_date IS NULL OR last_reset_date < $1
            ",
        )
        .bind(today)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::unavailable("reset_all", &e))?;

        Ok(result.rows_affected())
    }
}

impl InventoryStore for PostgresInventoryStore {
    fn get(&self, coupon_id: CouponId) -> StoreFuture<'_, Result<InventoryRecord>> {
        Box::pin(self.fetch(coupon_id))
    }

    fn create(
        &self,
        coupon_id: CouponId,
        daily_limit: u32,
    ) -> StoreFuture<'_, Result<InventoryRecord>> {
        Box::pin(self.insert(coupon_id, daily_limit))
    }

    fn compare_and_decrement(
        &self,
        coupon_id: CouponId,
        expected: Counter,
        today: NaiveDate,
    ) -> StoreFuture<'_, Result<Decrement>> {
        Box::pin(self.decrement(coupon_id, expected, today))
    }

    fn release_one(&self, coupon_id: CouponId, today: NaiveDate) -> StoreFuture<'_, Result<bool>> {
        Box::pin(self.release(coupon_id, today))
    }

    fn count_due_for_reset(&self, today: NaiveDate) -> StoreFuture<'_, Result<u64>> {
        Box::pin(self.count_due(today))
    }

    fn reset_all(&self, today: NaiveDate) -> StoreFuture<'_, Result<u64>> {
        Box::pin(self.refill_all(today))
    }
}
