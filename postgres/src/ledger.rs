//! `PostgreSQL` grant ledger.

use crate::store_failure;
use chrono::{DateTime, Utc};
use coupon_inventory_core::error::{LedgerError, LedgerResult};
use coupon_inventory_core::grant::{GrantStatus, NewGrant, UserCouponGrant};
use coupon_inventory_core::ledger::GrantLedger;
use coupon_inventory_core::store::StoreFuture;
use coupon_inventory_core::types::{CouponId, GrantId, UserId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const STORE: &str = "ledger";

const GRANT_COLUMNS: &str = "grant_id, user_id, coupon_id, status, issued_at, expires_at, used_at";

/// `PostgreSQL`-backed [`GrantLedger`].
///
/// Duplicate live grants are rejected by the `uq_user_coupon_grants_live`
/// partial unique index, so two concurrent inserts for the same user and
/// coupon cannot both succeed even across processes.
#[derive(Clone, Debug)]
pub struct PostgresGrantLedger {
    pool: PgPool,
}

impl PostgresGrantLedger {
    /// Create a ledger over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn unavailable(operation: &'static str, error: &sqlx::Error) -> LedgerError {
        LedgerError::StoreUnavailable(store_failure(STORE, operation, error))
    }

    fn row_to_grant(row: &PgRow) -> LedgerResult<UserCouponGrant> {
        let read = |e: sqlx::Error| Self::unavailable("decode", &e);
        let status: String = row.try_get("status").map_err(read)?;

        Ok(UserCouponGrant {
            grant_id: GrantId::new(row.try_get("grant_id").map_err(read)?),
            user_id: UserId::new(row.try_get("user_id").map_err(read)?),
            coupon_id: CouponId::new(row.try_get("coupon_id").map_err(read)?),
            status: GrantStatus::parse(&status)?,
            issued_at: row.try_get("issued_at").map_err(read)?,
            expires_at: row.try_get("expires_at").map_err(read)?,
            used_at: row.try_get("used_at").map_err(read)?,
        })
    }

    async fn exists_live(&self, user_id: UserId, coupon_id: CouponId) -> LedgerResult<bool> {
        sqlx::query_scalar(
            r"
            SELECT EXISTS (
                SELECT 1 FROM user_coupon_grants
                WHERE user_id = $1 AND coupon_id = $2 AND status IN ('active', 'used')
            )
            ",
        )
        .bind(user_id.get())
        .bind(coupon_id.get())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Self::unavailable("has_claimed", &e))
    }

    async fn insert_grant(&self, new: NewGrant) -> LedgerResult<UserCouponGrant> {
        let row = sqlx::query(&format!(
            r"
            INSERT INTO user_coupon_grants (user_id, coupon_id, status, issued_at, expires_at)
            VALUES ($1, $2, 'active', $3, $4)
            RETURNING {GRANT_COLUMNS}
            "
        ))
        .bind(new.user_id.get())
        .bind(new.coupon_id.get())
        .bind(new.issued_at)
        .bind(new.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if crate::is_unique_violation(&e) {
                LedgerError::Duplicate {
                    user_id: new.user_id,
                    coupon_id: new.coupon_id,
                }
            } else {
                Self::unavailable("insert", &e)
            }
        })?;

        Self::row_to_grant(&row)
    }

    async fn fetch(&self, grant_id: GrantId) -> LedgerResult<UserCouponGrant> {
        let row = sqlx::query(&format!(
            "SELECT {GRANT_COLUMNS} FROM user_coupon_grants WHERE grant_id = $1"
        ))
        .bind(grant_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Self::unavailable("get", &e))?
        .ok_or(LedgerError::GrantNotFound(grant_id))?;

        Self::row_to_grant(&row)
    }

    async fn list(
        &self,
        user_id: UserId,
        status: GrantStatus,
    ) -> LedgerResult<Vec<UserCouponGrant>> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {GRANT_COLUMNS}
            FROM user_coupon_grants
            WHERE user_id = $1 AND status = $2
            ORDER BY issued_at DESC, grant_id DESC
            "
        ))
        .bind(user_id.get())
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Self::unavailable("list_for_user", &e))?;

        rows.iter().map(Self::row_to_grant).collect()
    }

    /// Lock the grant row, apply `transition`, and write the result back.
    async fn transition<F>(
        &self,
        operation: &'static str,
        grant_id: GrantId,
        transition: F,
    ) -> LedgerResult<UserCouponGrant>
    where
        F: FnOnce(&mut UserCouponGrant) -> LedgerResult<()> + Send,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Self::unavailable(operation, &e))?;

        let row = sqlx::query(&format!(
            "SELECT {GRANT_COLUMNS} FROM user_coupon_grants WHERE grant_id = $1 FOR UPDATE"
        ))
        .bind(grant_id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| Self::unavailable(operation, &e))?
        .ok_or(LedgerError::GrantNotFound(grant_id))?;

        let mut grant = Self::row_to_grant(&row)?;
        transition(&mut grant)?;

        sqlx::query("UPDATE user_coupon_grants SET status = $2, used_at = $3 WHERE grant_id = $1")
            .bind(grant_id.get())
            .bind(grant.status.as_str())
            .bind(grant.used_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| Self::unavailable(operation, &e))?;

        tx.commit().await.map_err(|e| Self::unavailable(operation, &e))?;
        Ok(grant)
    }

    async fn expire(&self, now: DateTime<Utc>) -> LedgerResult<u64> {
        let result = sqlx::query(
            r"
            UPDATE user_coupon_grants
            SET status = 'expired'
            WHERE status = 'active' AND expires_at <= $1
            ",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::unavailable("expire_overdue", &e))?;

        Ok(result.rows_affected())
    }
}

impl GrantLedger for PostgresGrantLedger {
    fn has_claimed(
        &self,
        user_id: UserId,
        coupon_id: CouponId,
    ) -> StoreFuture<'_, LedgerResult<bool>> {
        Box::pin(self.exists_live(user_id, coupon_id))
    }

    fn insert(&self, grant: NewGrant) -> StoreFuture<'_, LedgerResult<UserCouponGrant>> {
        Box::pin(self.insert_grant(grant))
    }

    fn get(&self, grant_id: GrantId) -> StoreFuture<'_, LedgerResult<UserCouponGrant>> {
        Box::pin(self.fetch(grant_id))
    }

    fn list_for_user(
        &self,
        user_id: UserId,
        status: GrantStatus,
    ) -> StoreFuture<'_, LedgerResult<Vec<UserCouponGrant>>> {
        Box::pin(self.list(user_id, status))
    }

    fn mark_used(
        &self,
        grant_id: GrantId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, LedgerResult<UserCouponGrant>> {
        Box::pin(self.transition("mark_used", grant_id, move |g| g.mark_used(user_id, now)))
    }

    fn restore(
        &self,
        grant_id: GrantId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, LedgerResult<UserCouponGrant>> {
        Box::pin(self.transition("restore", grant_id, move |g| g.restore(user_id, now)))
    }

    fn expire_overdue(&self, now: DateTime<Utc>) -> StoreFuture<'_, LedgerResult<u64>> {
        Box::pin(self.expire(now))
    }
}
