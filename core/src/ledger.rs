//! Grant ledger abstraction.
//!
//! The ledger persists [`UserCouponGrant`]s. The claim path only asks whether
//! a user already holds a coupon; the issuer records new grants; the
//! expiration sweep bulk-expires overdue ones.

use crate::error::LedgerResult;
use crate::grant::{GrantStatus, NewGrant, UserCouponGrant};
use crate::store::StoreFuture;
use crate::types::{CouponId, GrantId, UserId};
use chrono::{DateTime, Utc};

/// Persistent store of coupon grants.
pub trait GrantLedger: Send + Sync {
    /// Whether the user holds an `ACTIVE` or `USED` grant for the coupon.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on storage failure.
    fn has_claimed(
        &self,
        user_id: UserId,
        coupon_id: CouponId,
    ) -> StoreFuture<'_, LedgerResult<bool>>;

    /// Record a new `ACTIVE` grant.
    ///
    /// # Errors
    ///
    /// - `Duplicate`: the user already holds an `ACTIVE` or `USED` grant for the coupon
    /// - `StoreUnavailable`: storage failure
    fn insert(&self, grant: NewGrant) -> StoreFuture<'_, LedgerResult<UserCouponGrant>>;

    /// Load a grant by id.
    ///
    /// # Errors
    ///
    /// - `GrantNotFound`: no such grant
    /// - `StoreUnavailable`: storage failure
    fn get(&self, grant_id: GrantId) -> StoreFuture<'_, LedgerResult<UserCouponGrant>>;

    /// List a user's grants in the given status, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on storage failure.
    fn list_for_user(
        &self,
        user_id: UserId,
        status: GrantStatus,
    ) -> StoreFuture<'_, LedgerResult<Vec<UserCouponGrant>>>;

    /// Apply a grant to a booking (`ACTIVE → USED`).
    ///
    /// # Errors
    ///
    /// `GrantNotFound`, `NotOwner`, `NotActive`, `Expired`, or `StoreUnavailable`.
    fn mark_used(
        &self,
        grant_id: GrantId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, LedgerResult<UserCouponGrant>>;

    /// Return a used grant after its booking was cancelled.
    ///
    /// See [`UserCouponGrant::restore`] for the transition rule.
    ///
    /// # Errors
    ///
    /// `GrantNotFound`, `NotOwner`, or `StoreUnavailable`.
    fn restore(
        &self,
        grant_id: GrantId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, LedgerResult<UserCouponGrant>>;

    /// Move every `ACTIVE` grant with `expires_at <= now` to `EXPIRED`.
    ///
    /// Returns the number of grants transitioned. Rows already `EXPIRED` are
    /// not matched, so a repeated call with the same `now` returns zero.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on storage failure.
    fn expire_overdue(&self, now: DateTime<Utc>) -> StoreFuture<'_, LedgerResult<u64>>;
}
