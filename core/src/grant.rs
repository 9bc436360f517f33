//! Coupon grants: a user's copy of a coupon and its status lifecycle.
//!
//! ```text
//!            mark_used              restore (before expiry)
//!   ACTIVE ────────────► USED ─────────────────────────────► ACTIVE
//!     │                   │
//!     │ sweep (overdue)   │ restore (after expiry)
//!     ▼                   ▼
//!   EXPIRED ◄─────────────┘
//! ```
//!
//! The expiration sweep only ever moves `ACTIVE → EXPIRED`; it never touches
//! `USED` grants.

use crate::error::{LedgerError, LedgerResult};
use crate::types::{CouponId, GrantId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a granted coupon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrantStatus {
    /// Held and usable
    Active,
    /// Applied to a booking
    Used,
    /// Past its expiry without being used
    Expired,
}

impl GrantStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Used => "used",
            Self::Expired => "expired",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> LedgerResult<Self> {
        match s {
            "active" => Ok(Self::Active),
            "used" => Ok(Self::Used),
            "expired" => Ok(Self::Expired),
            _ => Err(LedgerError::StoreUnavailable(format!(
                "Invalid grant status: {s}"
            ))),
        }
    }

    /// Whether a grant in this status blocks the user from claiming the coupon again.
    #[must_use]
    pub const fn holds_claim(&self) -> bool {
        matches!(self, Self::Active | Self::Used)
    }
}

/// A coupon granted to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCouponGrant {
    /// Unique identifier for this grant
    pub grant_id: GrantId,

    /// Owner of the grant
    pub user_id: UserId,

    /// Coupon definition the grant was issued from
    pub coupon_id: CouponId,

    /// Current status
    pub status: GrantStatus,

    /// When the grant was issued
    pub issued_at: DateTime<Utc>,

    /// When the grant stops being usable (`None` = never)
    pub expires_at: Option<DateTime<Utc>>,

    /// When the grant was applied to a booking
    pub used_at: Option<DateTime<Utc>>,
}

/// Fields needed to record a new grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGrant {
    /// Owner of the grant
    pub user_id: UserId,
    /// Coupon the grant is issued from
    pub coupon_id: CouponId,
    /// Issue instant
    pub issued_at: DateTime<Utc>,
    /// Expiry instant (`None` = never)
    pub expires_at: Option<DateTime<Utc>>,
}

impl UserCouponGrant {
    /// Create an `ACTIVE` grant with the given id.
    #[must_use]
    pub const fn issue(grant_id: GrantId, new: NewGrant) -> Self {
        Self {
            grant_id,
            user_id: new.user_id,
            coupon_id: new.coupon_id,
            status: GrantStatus::Active,
            issued_at: new.issued_at,
            expires_at: new.expires_at,
            used_at: None,
        }
    }

    /// Whether the expiry timestamp is at or before `now`.
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Whether the sweep should expire this grant at `now`.
    #[must_use]
    pub fn should_expire(&self, now: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Active && self.is_overdue(now)
    }

    fn ensure_owner(&self, user_id: UserId) -> LedgerResult<()> {
        if self.user_id == user_id {
            Ok(())
        } else {
            Err(LedgerError::NotOwner {
                grant_id: self.grant_id,
                user_id,
            })
        }
    }

    /// Apply the grant to a booking: `ACTIVE → USED`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotOwner`] if `user_id` does not own the grant
    /// - [`LedgerError::NotActive`] if the grant is not `ACTIVE`
    /// - [`LedgerError::Expired`] if the grant is past its expiry
    pub fn mark_used(&mut self, user_id: UserId, now: DateTime<Utc>) -> LedgerResult<()> {
        self.ensure_owner(user_id)?;
        if self.status != GrantStatus::Active {
            return Err(LedgerError::NotActive(self.grant_id));
        }
        if self.is_overdue(now) {
            return Err(LedgerError::Expired(self.grant_id));
        }
        self.status = GrantStatus::Used;
        self.used_at = Some(now);
        Ok(())
    }

    /// Give a used grant back after its booking was cancelled.
    ///
    /// `USED → ACTIVE` while the grant is still within its expiry, otherwise
    /// `USED → EXPIRED`. Grants in any other status are left unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotOwner`] if `user_id` does not own the grant.
    pub fn restore(&mut self, user_id: UserId, now: DateTime<Utc>) -> LedgerResult<()> {
        self.ensure_owner(user_id)?;
        if self.status != GrantStatus::Used {
            return Ok(());
        }
        self.status = if self.is_overdue(now) {
            GrantStatus::Expired
        } else {
            GrantStatus::Active
        };
        self.used_at = None;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn grant(expires_in: Option<Duration>) -> UserCouponGrant {
        UserCouponGrant::issue(
            GrantId::new(1),
            NewGrant {
                user_id: UserId::new(100),
                coupon_id: CouponId::new(5),
                issued_at: now(),
                expires_at: expires_in.map(|d| now() + d),
            },
        )
    }

    #[test]
    fn status_round_trips_through_db_string() {
        for status in [GrantStatus::Active, GrantStatus::Used, GrantStatus::Expired] {
            assert_eq!(GrantStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(GrantStatus::parse("issued").is_err());
    }

    #[test]
    fn expired_grant_does_not_hold_claim() {
        assert!(GrantStatus::Active.holds_claim());
        assert!(GrantStatus::Used.holds_claim());
        assert!(!GrantStatus::Expired.holds_claim());
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let g = grant(Some(Duration::hours(1)));
        assert!(!g.should_expire(now()));
        assert!(g.should_expire(now() + Duration::hours(1)));
        assert!(!grant(None).should_expire(now() + Duration::days(3650)));
    }

    #[test]
    fn used_grant_is_never_expired_by_sweep() {
        let mut g = grant(Some(Duration::hours(1)));
        g.mark_used(UserId::new(100), now()).unwrap();
        assert!(!g.should_expire(now() + Duration::days(1)));
    }

    #[test]
    fn mark_used_checks_owner_status_and_expiry() {
        let mut g = grant(Some(Duration::hours(1)));
        assert!(matches!(
            g.mark_used(UserId::new(1), now()),
            Err(LedgerError::NotOwner { .. })
        ));
        assert!(matches!(
            g.clone().mark_used(UserId::new(100), now() + Duration::hours(2)),
            Err(LedgerError::Expired(_))
        ));

        g.mark_used(UserId::new(100), now()).unwrap();
        assert_eq!(g.status, GrantStatus::Used);
        assert_eq!(g.used_at, Some(now()));
        assert!(matches!(
            g.mark_used(UserId::new(100), now()),
            Err(LedgerError::NotActive(_))
        ));
    }

    #[test]
    fn restore_before_expiry_reactivates() {
        let mut g = grant(Some(Duration::hours(1)));
        g.mark_used(UserId::new(100), now()).unwrap();
        g.restore(UserId::new(100), now() + Duration::minutes(30)).unwrap();
        assert_eq!(g.status, GrantStatus::Active);
        assert_eq!(g.used_at, None);
    }

    #[test]
    fn restore_after_expiry_expires() {
        let mut g = grant(Some(Duration::hours(1)));
        g.mark_used(UserId::new(100), now()).unwrap();
        g.restore(UserId::new(100), now() + Duration::hours(2)).unwrap();
        assert_eq!(g.status, GrantStatus::Expired);
    }

    #[test]
    fn restore_ignores_non_used_grant() {
        let mut g = grant(None);
        g.restore(UserId::new(100), now()).unwrap();
        assert_eq!(g.status, GrantStatus::Active);
    }
}
