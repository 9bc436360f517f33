//! # Coupon Inventory Core
//!
//! Core types and traits for limited-quantity coupon inventory.
//!
//! A coupon may carry a daily first-come-first-served quota. This crate owns
//! the pieces of that model that need no I/O:
//!
//! - **Inventory records**: the persisted per-coupon counter ([`inventory`])
//! - **Daily reset policy**: the pure refill rule applied before every claim decision
//! - **Grants**: a user's copy of a coupon and its status lifecycle ([`grant`])
//! - **Storage seams**: [`store::InventoryStore`] and [`ledger::GrantLedger`]
//! - **Environment**: injected time via [`environment::Clock`]
//!
//! ## Architecture Principles
//!
//! - Correctness of the daily count rests on the store's conditional update,
//!   never on an in-process lock
//! - Policies are plain functions over values so they can be tested without a database
//! - Contention is a value ([`store::Decrement::Conflict`]), not an error
//!
//! ## Example
//!
//! ```
//! use chrono::NaiveDate;
//! use coupon_inventory_core::inventory::{reset_if_needed, InventoryRecord};
//! use coupon_inventory_core::types::{CouponId, InventoryId};
//!
//! let yesterday = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
//! let today = yesterday.succ_opt().unwrap();
//!
//! let record = InventoryRecord::new(InventoryId::new(1), CouponId::new(7), 3)
//!     .with_counter(0, Some(yesterday))
//!     .unwrap();
//!
//! let refilled = reset_if_needed(record, today);
//! assert_eq!(refilled.available_today(), 3);
//! assert_eq!(refilled.last_reset_date(), Some(today));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod grant;
pub mod inventory;
pub mod ledger;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, NaiveDate, Utc};

/// Environment module - injected dependencies
///
/// All time-dependent decisions (which calendar day a claim belongs to, whether
/// a grant is overdue) read the current instant through [`environment::Clock`],
/// so tests can pin it.
pub mod environment {
    use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// let clock = SystemClock;
    ///
    /// // Test - fixed time for deterministic tests
    /// let clock = FixedClock::new(time);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time from the operating system.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Default business offset: Korea Standard Time, UTC+09:00.
    pub const DEFAULT_UTC_OFFSET_SECONDS: i32 = 9 * 3600;

    /// [`DEFAULT_UTC_OFFSET_SECONDS`] as a [`FixedOffset`].
    #[must_use]
    pub fn default_business_offset() -> FixedOffset {
        FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECONDS).unwrap_or_else(|| Utc.fix())
    }

    /// Calendar date of `instant` as observed at `offset`.
    ///
    /// Daily quotas roll over at local midnight of the business, not at UTC
    /// midnight, so every "today" in the system goes through this function.
    #[must_use]
    pub fn business_date(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
        instant.with_timezone(&offset).date_naive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::environment::business_date;
    use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

    #[test]
    fn business_date_follows_offset() {
        let instant = DateTime::parse_from_rfc3339("2025-01-01T16:30:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let utc = FixedOffset::east_opt(0).unwrap();
        let kst = FixedOffset::east_opt(9 * 3600).unwrap();

        assert_eq!(business_date(instant, utc), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(business_date(instant, kst), NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());
    }
}
