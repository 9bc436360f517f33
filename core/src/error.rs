//! Error types for inventory and grant storage.
//!
//! Expected business outcomes (`OutOfStock`, `AlreadyClaimed`) are not errors
//! and never appear here; they are returned as outcome values by the claim
//! path. Storage contention is not an error either: conditional updates report
//! it as [`crate::store::Decrement::Conflict`].

use crate::types::{CouponId, GrantId, UserId};
use thiserror::Error;

/// Errors from the inventory record store.
#[derive(Error, Debug)]
pub enum InventoryError {
    /// The coupon has no inventory record.
    ///
    /// Callers treat this as a configuration problem, not a user error.
    #[error("No inventory record for coupon {0}")]
    NotFound(CouponId),

    /// An inventory record already exists for the coupon.
    #[error("Inventory record already exists for coupon {0}")]
    AlreadyExists(CouponId),

    /// A stored or supplied counter breaks `available_today <= daily_limit`.
    #[error("Invalid counter for coupon {coupon_id}: {available_today} available exceeds daily limit {daily_limit}")]
    InvalidCounter {
        /// Coupon whose counter is invalid
        coupon_id: CouponId,
        /// Offending available count
        available_today: u32,
        /// Configured daily limit
        daily_limit: u32,
    },

    /// The backing store could not be reached or the statement failed.
    ///
    /// Fatal for the current request and safe to retry; never reported to
    /// users as out-of-stock.
    #[error("Inventory store unavailable: {0}")]
    StoreUnavailable(String),
}

impl InventoryError {
    /// Whether the caller may retry the whole request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

/// Errors from the grant ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// No grant with the given id.
    #[error("Grant not found: {0}")]
    GrantNotFound(GrantId),

    /// The grant belongs to another user.
    #[error("Grant {grant_id} does not belong to user {user_id}")]
    NotOwner {
        /// Grant that was addressed
        grant_id: GrantId,
        /// User who addressed it
        user_id: UserId,
    },

    /// The grant is not in a status that allows the transition.
    #[error("Grant {0} is not active")]
    NotActive(GrantId),

    /// The grant is past its expiry timestamp.
    #[error("Grant {0} has expired")]
    Expired(GrantId),

    /// The user already holds an active or used grant for the coupon.
    #[error("User {user_id} already holds coupon {coupon_id}")]
    Duplicate {
        /// User holding the grant
        user_id: UserId,
        /// Coupon held
        coupon_id: CouponId,
    },

    /// The backing store could not be reached or the statement failed.
    #[error("Grant ledger unavailable: {0}")]
    StoreUnavailable(String),
}

/// Result alias for inventory store operations.
pub type Result<T> = std::result::Result<T, InventoryError>;

/// Result alias for grant ledger operations.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_error_display() {
        let error = InventoryError::NotFound(CouponId::new(12));
        assert!(format!("{error}").contains("coupon 12"));
    }

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(InventoryError::StoreUnavailable("timeout".into()).is_retryable());
        assert!(!InventoryError::NotFound(CouponId::new(1)).is_retryable());
    }

    #[test]
    fn duplicate_error_display() {
        let error = LedgerError::Duplicate {
            user_id: UserId::new(3),
            coupon_id: CouponId::new(4),
        };
        let display = format!("{error}");
        assert!(display.contains("User 3"));
        assert!(display.contains("coupon 4"));
    }
}
