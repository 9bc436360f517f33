//! Inventory records and the daily reset policy.
//!
//! An [`InventoryRecord`] is the persisted per-coupon counter behind a daily
//! first-come-first-served quota. Its mutable part is the [`Counter`]:
//! how many units remain today and which day the counter was last refilled.
//!
//! # Invariant
//!
//! `0 <= available_today <= daily_limit` holds for every record that can be
//! constructed. Operations that would break it return `None` or an error
//! instead of clamping.
//!
//! # Daily Reset Policy
//!
//! [`reset_if_needed`] refills a counter whose `last_reset_date` is missing or
//! strictly before `today`. It is a pure function: claims apply it to the
//! record they just read, and stores apply the same rule (via
//! [`Counter::reset_if_needed`]) inside their conditional update so the refill
//! is persisted together with the decrement.

use crate::error::{InventoryError, Result};
use crate::types::{CouponId, InventoryId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Mutable part of an inventory record.
///
/// Stores compare against a whole `Counter` when performing a conditional
/// decrement, so a refill observed by one claimant cannot be silently
/// overwritten by another that read the pre-refill state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Counter {
    /// Units still claimable on `last_reset_date`
    pub available_today: u32,
    /// Day of the most recent refill (`None` before first use)
    pub last_reset_date: Option<NaiveDate>,
}

impl Counter {
    /// Create a counter from its parts.
    #[must_use]
    pub const fn new(available_today: u32, last_reset_date: Option<NaiveDate>) -> Self {
        Self {
            available_today,
            last_reset_date,
        }
    }

    /// Whether this counter belongs to a day before `today`.
    #[must_use]
    pub fn needs_reset(&self, today: NaiveDate) -> bool {
        self.last_reset_date.is_none_or(|last| last < today)
    }

    /// Apply the daily reset policy for `today`.
    #[must_use]
    pub fn reset_if_needed(self, daily_limit: u32, today: NaiveDate) -> Self {
        if self.needs_reset(today) {
            Self::new(daily_limit, Some(today))
        } else {
            self
        }
    }

    /// Remove one unit, or `None` if nothing is left.
    #[must_use]
    pub fn take_one(self) -> Option<Self> {
        self.available_today
            .checked_sub(1)
            .map(|available_today| Self { available_today, ..self })
    }
}

/// Persisted daily counter for one coupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    inventory_id: InventoryId,
    coupon_id: CouponId,
    daily_limit: u32,
    counter: Counter,
}

impl InventoryRecord {
    /// Create a record that has never been used.
    ///
    /// The counter starts at zero with no reset date, so the first claim
    /// refills it to `daily_limit`.
    #[must_use]
    pub const fn new(inventory_id: InventoryId, coupon_id: CouponId, daily_limit: u32) -> Self {
        Self {
            inventory_id,
            coupon_id,
            daily_limit,
            counter: Counter::new(0, None),
        }
    }

    /// Rebuild a record from stored parts, checking the counter invariant.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::InvalidCounter`] if `available_today` exceeds
    /// `daily_limit`.
    pub fn from_parts(
        inventory_id: InventoryId,
        coupon_id: CouponId,
        daily_limit: u32,
        counter: Counter,
    ) -> Result<Self> {
        Self::new(inventory_id, coupon_id, daily_limit)
            .with_counter(counter.available_today, counter.last_reset_date)
    }

    /// Replace the counter.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::InvalidCounter`] if `available_today` exceeds
    /// `daily_limit`.
    pub fn with_counter(
        mut self,
        available_today: u32,
        last_reset_date: Option<NaiveDate>,
    ) -> Result<Self> {
        if available_today > self.daily_limit {
            return Err(InventoryError::InvalidCounter {
                coupon_id: self.coupon_id,
                available_today,
                daily_limit: self.daily_limit,
            });
        }
        self.counter = Counter::new(available_today, last_reset_date);
        Ok(self)
    }

    /// Surrogate identity
    #[must_use]
    pub const fn inventory_id(&self) -> InventoryId {
        self.inventory_id
    }

    /// Coupon this record limits
    #[must_use]
    pub const fn coupon_id(&self) -> CouponId {
        self.coupon_id
    }

    /// Units granted per day
    #[must_use]
    pub const fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    /// Units still claimable today
    #[must_use]
    pub const fn available_today(&self) -> u32 {
        self.counter.available_today
    }

    /// Day of the most recent refill
    #[must_use]
    pub const fn last_reset_date(&self) -> Option<NaiveDate> {
        self.counter.last_reset_date
    }

    /// The mutable part of the record, as used for conditional updates
    #[must_use]
    pub const fn counter(&self) -> Counter {
        self.counter
    }

    /// Whether at least one unit can be claimed.
    #[must_use]
    pub const fn has_available(&self) -> bool {
        self.counter.available_today > 0
    }

    /// Remove one unit, or `None` if the record is exhausted.
    #[must_use]
    pub fn take_one(self) -> Option<Self> {
        let counter = self.counter.take_one()?;
        Some(Self { counter, ..self })
    }
}

/// Daily reset policy.
///
/// If `last_reset_date` is missing or strictly before `today`, the record is
/// refilled to its `daily_limit` and stamped with `today`; otherwise it is
/// returned unchanged. Applying it twice with the same `today` is a no-op the
/// second time.
#[must_use]
pub fn reset_if_needed(record: InventoryRecord, today: NaiveDate) -> InventoryRecord {
    let counter = record.counter.reset_if_needed(record.daily_limit, today);
    InventoryRecord { counter, ..record }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn record(limit: u32, available: u32, last: Option<NaiveDate>) -> InventoryRecord {
        InventoryRecord::new(InventoryId::new(1), CouponId::new(10), limit)
            .with_counter(available, last)
            .unwrap()
    }

    #[test]
    fn never_used_record_is_refilled() {
        let fresh = InventoryRecord::new(InventoryId::new(1), CouponId::new(10), 5);
        let refilled = reset_if_needed(fresh, day(2));
        assert_eq!(refilled.available_today(), 5);
        assert_eq!(refilled.last_reset_date(), Some(day(2)));
    }

    #[test]
    fn stale_day_is_refilled() {
        let refilled = reset_if_needed(record(3, 0, Some(day(1))), day(2));
        assert_eq!(refilled.available_today(), 3);
        assert_eq!(refilled.last_reset_date(), Some(day(2)));
    }

    #[test]
    fn same_day_is_untouched() {
        let current = record(3, 1, Some(day(2)));
        assert_eq!(reset_if_needed(current.clone(), day(2)), current);
    }

    #[test]
    fn future_reset_date_is_untouched() {
        // A clock running behind must not refill a counter another node already reset
        let current = record(3, 0, Some(day(3)));
        assert_eq!(reset_if_needed(current.clone(), day(2)), current);
    }

    #[test]
    fn take_one_rejects_empty_counter() {
        assert!(record(3, 0, Some(day(2))).take_one().is_none());
        assert_eq!(record(3, 2, Some(day(2))).take_one().unwrap().available_today(), 1);
    }

    #[test]
    fn counter_above_limit_is_rejected() {
        let result =
            InventoryRecord::new(InventoryId::new(1), CouponId::new(10), 2).with_counter(3, None);
        assert!(matches!(
            result,
            Err(InventoryError::InvalidCounter { available_today: 3, daily_limit: 2, .. })
        ));
    }

    #[test]
    fn zero_limit_never_has_stock() {
        let refilled = reset_if_needed(record(0, 0, None), day(2));
        assert!(!refilled.has_available());
        assert!(refilled.take_one().is_none());
    }

    proptest! {
        #[test]
        fn reset_is_idempotent(
            limit in 0u32..50,
            spent in 0u32..50,
            last in 1u32..28,
            today in 1u32..28,
        ) {
            let available = limit.saturating_sub(spent);
            let once = reset_if_needed(record(limit, available, Some(day(last))), day(today));
            let twice = reset_if_needed(once.clone(), day(today));
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn counter_stays_within_bounds(
            limit in 0u32..20,
            ops in proptest::collection::vec((any::<bool>(), 1u32..5), 0..60),
        ) {
            let mut current = record(limit, 0, None);
            for (is_claim, d) in ops {
                current = if is_claim {
                    let refilled = reset_if_needed(current, day(d));
                    refilled.clone().take_one().unwrap_or(refilled)
                } else {
                    reset_if_needed(current, day(d))
                };
                prop_assert!(current.available_today() <= current.daily_limit());
            }
        }
    }
}
