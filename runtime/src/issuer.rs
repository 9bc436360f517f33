//! Coupon issuance: a successful claim followed by the grant that records it.
//!
//! The claim and the grant insert are two separate writes. When the insert
//! fails after the unit was taken, the issuer hands the unit back with
//! [`InventoryStore::release_one`](coupon_inventory_core::store::InventoryStore::release_one)
//! so the daily count is not leaked. A duplicate insert (the same user racing
//! themselves past the ledger check) is reported as
//! [`IssueOutcome::AlreadyClaimed`].
//!
//! Grant usage and restoration from the booking flow also go through here so
//! they are dated by the same clock as issuance.

use crate::coordinator::{ClaimCoordinator, ClaimError, ClaimOutcome};
use crate::metrics::ClaimMetrics;
use chrono::{DateTime, NaiveDate, Utc};
use coupon_inventory_core::error::LedgerError;
use coupon_inventory_core::grant::{NewGrant, UserCouponGrant};
use coupon_inventory_core::types::{CouponId, GrantId, UserId};

/// Result of an issuance request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    /// The grant now exists and one unit of today's quota is consumed.
    Issued(UserCouponGrant),
    /// Nothing left today.
    OutOfStock,
    /// The user already holds an active or used grant for the coupon.
    AlreadyClaimed,
}

/// Couples [`ClaimCoordinator::claim_one`] to grant creation.
#[derive(Clone)]
pub struct CouponIssuer {
    coordinator: ClaimCoordinator,
}

impl CouponIssuer {
    /// Create an issuer on top of a coordinator.
    #[must_use]
    pub const fn new(coordinator: ClaimCoordinator) -> Self {
        Self { coordinator }
    }

    /// The underlying claim coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &ClaimCoordinator {
        &self.coordinator
    }

    /// Claim a unit for `user_id` and record the grant.
    ///
    /// # Errors
    ///
    /// Any error from [`ClaimCoordinator::claim_one`], or a ledger error other
    /// than a duplicate when the grant is inserted. In the latter case the
    /// consumed unit has already been handed back.
    pub async fn issue(
        &self,
        coupon_id: CouponId,
        user_id: UserId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<IssueOutcome, ClaimError> {
        let today = self.coordinator.today();
        match self.coordinator.claim_one_on(coupon_id, user_id, today).await? {
            ClaimOutcome::Claimed => {}
            ClaimOutcome::OutOfStock => return Ok(IssueOutcome::OutOfStock),
            ClaimOutcome::AlreadyClaimed => return Ok(IssueOutcome::AlreadyClaimed),
        }

        let issued_at = self.coordinator.clock().now();
        let new = NewGrant {
            user_id,
            coupon_id,
            issued_at,
            expires_at,
        };

        match self.coordinator.ledger().insert(new).await {
            Ok(grant) => {
                tracing::info!(
                    %coupon_id,
                    %user_id,
                    grant_id = %grant.grant_id,
                    "Coupon issued"
                );
                Ok(IssueOutcome::Issued(grant))
            }
            Err(LedgerError::Duplicate { .. }) => {
                self.release(coupon_id, user_id, today).await;
                tracing::debug!(%coupon_id, %user_id, "Concurrent duplicate claim rejected");
                Ok(IssueOutcome::AlreadyClaimed)
            }
            Err(error) => {
                self.release(coupon_id, user_id, today).await;
                Err(error.into())
            }
        }
    }

    async fn release(&self, coupon_id: CouponId, user_id: UserId, today: NaiveDate) {
        match self.coordinator.store().release_one(coupon_id, today).await {
            Ok(true) => {
                ClaimMetrics::record_release();
                tracing::info!(%coupon_id, %user_id, "Released unit after failed grant insert");
            }
            Ok(false) => {
                tracing::warn!(
                    %coupon_id,
                    %user_id,
                    %today,
                    "Unit could not be released; inventory moved to another day or is full"
                );
            }
            Err(error) => {
                tracing::error!(
                    %coupon_id,
                    %user_id,
                    %error,
                    "Failed to release unit after failed grant insert"
                );
            }
        }
    }

    /// Apply a grant to a booking.
    ///
    /// # Errors
    ///
    /// `GrantNotFound`, `NotOwner`, `NotActive`, `Expired`, or `StoreUnavailable`.
    pub async fn use_grant(
        &self,
        grant_id: GrantId,
        user_id: UserId,
    ) -> Result<UserCouponGrant, LedgerError> {
        let now = self.coordinator.clock().now();
        let grant = self.coordinator.ledger().mark_used(grant_id, user_id, now).await?;
        tracing::info!(%grant_id, %user_id, "Grant used");
        Ok(grant)
    }

    /// Give a used grant back after its booking was cancelled.
    ///
    /// # Errors
    ///
    /// `GrantNotFound`, `NotOwner`, or `StoreUnavailable`.
    pub async fn restore_grant(
        &self,
        grant_id: GrantId,
        user_id: UserId,
    ) -> Result<UserCouponGrant, LedgerError> {
        let now = self.coordinator.clock().now();
        let grant = self.coordinator.ledger().restore(grant_id, user_id, now).await?;
        tracing::info!(%grant_id, %user_id, status = grant.status.as_str(), "Grant restored");
        Ok(grant)
    }
}
