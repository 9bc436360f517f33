//! # Coupon Inventory Testing
//!
//! Testing utilities for the coupon inventory crates.
//!
//! This crate provides:
//! - In-memory implementations of [`InventoryStore`](coupon_inventory_core::store::InventoryStore)
//!   and [`GrantLedger`](coupon_inventory_core::ledger::GrantLedger)
//! - Deterministic clocks
//! - Property-based testing strategies
//! - Tracing setup for tests
//!
//! ## Example
//!
//! ```ignore
//! use coupon_inventory_testing::{test_clock, InMemoryGrantLedger, InMemoryInventoryStore};
//!
//! #[tokio::test]
//! async fn claim_flow() {
//!     let store = Arc::new(InMemoryInventoryStore::new());
//!     store.create(CouponId::new(1), 5).await.unwrap();
//!
//!     let ledger = Arc::new(InMemoryGrantLedger::new());
//!     let coordinator = ClaimCoordinator::new(store, ledger, Arc::new(test_clock()));
//!     let outcome = coordinator.claim_one(CouponId::new(1), UserId::new(7)).await.unwrap();
//!     assert_eq!(outcome, ClaimOutcome::Claimed);
//! }
//! ```

use chrono::{DateTime, Utc};
use coupon_inventory_core::environment::Clock;

pub mod stores;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use coupon_inventory_testing::mocks::FixedClock;
    /// use coupon_inventory_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test moves it.
    ///
    /// Clones share the same instant, so a test can hand one clone to the
    /// code under test and advance the other across a day boundary.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock stopped at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Jump to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }

        /// Move forward by `by`
        pub fn advance(&self, by: chrono::Duration) {
            let mut guard = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *guard += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_instant())
    }

    /// The instant used by [`test_clock`].
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is hardcoded.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_instant() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }
}

/// Test helpers and utilities
pub mod helpers {
    /// Install a `tracing` subscriber that writes through the test harness.
    ///
    /// Safe to call from every test; only the first call installs anything.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use chrono::NaiveDate;
    use coupon_inventory_core::inventory::Counter;
    use proptest::prelude::*;

    /// Days within a single month, for reset-date strategies
    pub fn day_in_march() -> impl Strategy<Value = NaiveDate> {
        (1u32..=31).prop_filter_map("valid day", |d| NaiveDate::from_ymd_opt(2025, 3, d))
    }

    /// A daily limit together with a counter that respects it
    pub fn limit_and_counter() -> impl Strategy<Value = (u32, Counter)> {
        (0u32..100).prop_flat_map(|limit| {
            (
                Just(limit),
                (0..=limit, proptest::option::of(day_in_march()))
                    .prop_map(|(available, last)| Counter::new(available, last)),
            )
        })
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock, test_instant};
pub use stores::{InMemoryGrantLedger, InMemoryInventoryStore};
