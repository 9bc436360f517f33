//! Claim coordinator: the contended path that turns a request into one unit of
//! today's quota.
//!
//! No process-local lock guards the counter. Every claim reads the persisted
//! record, decides with the daily reset applied, and commits through the
//! store's compare-and-decrement; losing that race means someone else took a
//! unit, so the claim re-reads and decides again. Retries are bounded, and a
//! claim that keeps losing reports [`ClaimOutcome::OutOfStock`].

use crate::metrics::ClaimMetrics;
use crate::retry::ClaimRetryPolicy;
use chrono::{FixedOffset, NaiveDate};
use coupon_inventory_core::environment::{Clock, business_date, default_business_offset};
use coupon_inventory_core::error::{InventoryError, LedgerError};
use coupon_inventory_core::inventory::reset_if_needed;
use coupon_inventory_core::ledger::GrantLedger;
use coupon_inventory_core::store::{Decrement, InventoryStore};
use coupon_inventory_core::types::{CouponId, UserId};
use std::sync::Arc;
use thiserror::Error;

/// Business result of a claim. None of these is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimOutcome {
    /// One unit was consumed for the user; the caller records the grant.
    Claimed,
    /// Today's quota is used up (or the claim kept losing races).
    OutOfStock,
    /// The user already holds an active or used grant for the coupon.
    AlreadyClaimed,
}

impl ClaimOutcome {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Claimed => "claimed",
            Self::OutOfStock => "out_of_stock",
            Self::AlreadyClaimed => "already_claimed",
        }
    }
}

/// Failure of the claim path itself.
#[derive(Error, Debug)]
pub enum ClaimError {
    /// Inventory store failure, or a coupon with no inventory record.
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    /// Grant ledger failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ClaimError {
    /// Whether the caller may retry the whole claim.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Inventory(InventoryError::StoreUnavailable(_))
                | Self::Ledger(LedgerError::StoreUnavailable(_))
        )
    }
}

/// Serialises concurrent claims on a coupon through the store's conditional update.
///
/// Cheap to clone; clones share the store, ledger, and clock.
#[derive(Clone)]
pub struct ClaimCoordinator {
    store: Arc<dyn InventoryStore>,
    ledger: Arc<dyn GrantLedger>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
    policy: ClaimRetryPolicy,
}

impl ClaimCoordinator {
    /// Create a coordinator with the default retry policy and business offset.
    #[must_use]
    pub fn new(
        store: Arc<dyn InventoryStore>,
        ledger: Arc<dyn GrantLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            ledger,
            clock,
            offset: default_business_offset(),
            policy: ClaimRetryPolicy::default(),
        }
    }

    /// Use `offset` to decide which calendar day a claim belongs to.
    #[must_use]
    pub const fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ClaimRetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Business date of the clock's current instant.
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        business_date(self.clock.now(), self.offset)
    }

    /// The inventory store claims are committed against.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn InventoryStore> {
        &self.store
    }

    /// The grant ledger consulted for duplicate claims.
    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn GrantLedger> {
        &self.ledger
    }

    /// The clock claims are dated with.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The retry policy in effect.
    #[must_use]
    pub const fn policy(&self) -> &ClaimRetryPolicy {
        &self.policy
    }

    /// Try to take one unit of today's quota for `user_id`.
    ///
    /// On [`ClaimOutcome::Claimed`] the unit is already gone from storage;
    /// recording the grant is the caller's job (see
    /// [`CouponIssuer`](crate::issuer::CouponIssuer)).
    ///
    /// # Errors
    ///
    /// - [`InventoryError::NotFound`]: the coupon has no inventory record
    /// - `StoreUnavailable` from the store or ledger; never reported as out-of-stock
    pub async fn claim_one(
        &self,
        coupon_id: CouponId,
        user_id: UserId,
    ) -> Result<ClaimOutcome, ClaimError> {
        self.claim_one_on(coupon_id, user_id, self.today()).await
    }

    /// [`claim_one`](Self::claim_one) against the quota of business date `today`.
    ///
    /// Every retry targets `today`, even if the clock crosses midnight while
    /// backing off, so callers that must later hand the unit back know which
    /// day it came from.
    ///
    /// # Errors
    ///
    /// Same as [`claim_one`](Self::claim_one).
    pub async fn claim_one_on(
        &self,
        coupon_id: CouponId,
        user_id: UserId,
        today: NaiveDate,
    ) -> Result<ClaimOutcome, ClaimError> {
        let result = self.claim(coupon_id, user_id, today).await;
        match &result {
            Ok(outcome) => ClaimMetrics::record_outcome(*outcome),
            Err(error) => {
                ClaimMetrics::record_error();
                tracing::warn!(%coupon_id, %user_id, %error, "Claim failed");
            }
        }
        result
    }

    async fn claim(
        &self,
        coupon_id: CouponId,
        user_id: UserId,
        today: NaiveDate,
    ) -> Result<ClaimOutcome, ClaimError> {
        if self.ledger.has_claimed(user_id, coupon_id).await? {
            tracing::debug!(%coupon_id, %user_id, "User already holds coupon");
            return Ok(ClaimOutcome::AlreadyClaimed);
        }

        let attempts = self.policy.max_attempts;

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.policy.delay_for_retry(attempt - 2);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            let persisted = self.store.get(coupon_id).await?;
            let expected = persisted.counter();
            let current = reset_if_needed(persisted, today);

            if !current.has_available() {
                tracing::debug!(%coupon_id, %user_id, attempt, %today, "Daily quota exhausted");
                return Ok(ClaimOutcome::OutOfStock);
            }

            match self.store.compare_and_decrement(coupon_id, expected, today).await? {
                Decrement::Applied => {
                    tracing::debug!(
                        %coupon_id,
                        %user_id,
                        attempt,
                        remaining = current.available_today() - 1,
                        "Claimed coupon unit"
                    );
                    return Ok(ClaimOutcome::Claimed);
                }
                Decrement::Conflict => {
                    ClaimMetrics::record_conflict();
                    tracing::debug!(%coupon_id, %user_id, attempt, "Lost claim race, re-reading");
                }
            }
        }

        tracing::warn!(
            %coupon_id,
            %user_id,
            attempts,
            "Claim retries exhausted, reporting out of stock"
        );
        Ok(ClaimOutcome::OutOfStock)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use coupon_inventory_core::grant::NewGrant;
    use coupon_inventory_testing::{
        FixedClock, InMemoryGrantLedger, InMemoryInventoryStore, test_instant,
    };

    const COUPON: CouponId = CouponId::new(42);

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    fn yesterday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
    }

    fn coordinator_at(
        now: DateTime<Utc>,
    ) -> (ClaimCoordinator, InMemoryInventoryStore, InMemoryGrantLedger) {
        let store = InMemoryInventoryStore::new();
        let ledger = InMemoryGrantLedger::new();
        let coordinator = ClaimCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(ledger.clone()),
            Arc::new(FixedClock::new(now)),
        );
        (coordinator, store, ledger)
    }

    fn setup() -> (ClaimCoordinator, InMemoryInventoryStore, InMemoryGrantLedger) {
        coordinator_at(test_instant())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_never_oversell() {
        coupon_inventory_testing::helpers::init_test_tracing();
        let (coordinator, store, _ledger) = setup();
        store.seed(COUPON, 5, 5, Some(today())).unwrap();

        let handles: Vec<_> = (0..100)
            .map(|user| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.claim_one(COUPON, UserId::new(user)).await })
            })
            .collect();

        let mut claimed = 0;
        let mut out_of_stock = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                ClaimOutcome::Claimed => claimed += 1,
                ClaimOutcome::OutOfStock => out_of_stock += 1,
                ClaimOutcome::AlreadyClaimed => panic!("distinct users cannot collide"),
            }
        }

        assert_eq!(claimed, 5);
        assert_eq!(out_of_stock, 95);
        assert_eq!(store.snapshot(COUPON).unwrap().available_today(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_first_claims_of_the_day_never_oversell() {
        for _ in 0..20 {
            let (coordinator, store, _ledger) = setup();
            // Yesterday's stock is spent; every claimant has to refill before taking
            store.seed(COUPON, 5, 0, Some(yesterday())).unwrap();

            let handles: Vec<_> = (0..100)
                .map(|user| {
                    let coordinator = coordinator.clone();
                    tokio::spawn(
                        async move { coordinator.claim_one(COUPON, UserId::new(user)).await },
                    )
                })
                .collect();

            let mut claimed = 0;
            for handle in handles {
                if handle.await.unwrap().unwrap() == ClaimOutcome::Claimed {
                    claimed += 1;
                }
            }

            let record = store.snapshot(COUPON).unwrap();
            assert_eq!(claimed, 5);
            assert_eq!(record.available_today(), 0);
            assert_eq!(record.last_reset_date(), Some(today()));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sixth_concurrent_claim_is_out_of_stock() {
        let (coordinator, store, _ledger) = setup();
        store.seed(COUPON, 5, 5, Some(today())).unwrap();

        let results = futures::future::join_all(
            (0..6).map(|user| coordinator.claim_one(COUPON, UserId::new(user))),
        )
        .await;

        let claimed = results
            .iter()
            .filter(|r| matches!(r, Ok(ClaimOutcome::Claimed)))
            .count();
        let out_of_stock = results
            .iter()
            .filter(|r| matches!(r, Ok(ClaimOutcome::OutOfStock)))
            .count();
        assert_eq!((claimed, out_of_stock), (5, 1));
    }

    #[tokio::test]
    async fn second_claim_by_holder_leaves_inventory_alone() {
        let (coordinator, store, ledger) = setup();
        store.seed(COUPON, 3, 3, Some(today())).unwrap();
        let user = UserId::new(7);

        assert_eq!(coordinator.claim_one(COUPON, user).await.unwrap(), ClaimOutcome::Claimed);
        ledger
            .insert(NewGrant {
                user_id: user,
                coupon_id: COUPON,
                issued_at: test_instant(),
                expires_at: None,
            })
            .await
            .unwrap();

        assert_eq!(
            coordinator.claim_one(COUPON, user).await.unwrap(),
            ClaimOutcome::AlreadyClaimed
        );
        assert_eq!(store.snapshot(COUPON).unwrap().available_today(), 2);
    }

    #[tokio::test]
    async fn first_claim_of_the_day_refills_then_consumes() {
        let (coordinator, store, _ledger) = setup();
        store.seed(COUPON, 3, 0, Some(yesterday())).unwrap();

        assert_eq!(
            coordinator.claim_one(COUPON, UserId::new(1)).await.unwrap(),
            ClaimOutcome::Claimed
        );

        let record = store.snapshot(COUPON).unwrap();
        assert_eq!(record.available_today(), 2);
        assert_eq!(record.last_reset_date(), Some(today()));
    }

    #[tokio::test]
    async fn never_used_record_is_refilled_on_first_claim() {
        let (coordinator, store, _ledger) = setup();
        store.create(COUPON, 2).await.unwrap();

        assert_eq!(
            coordinator.claim_one(COUPON, UserId::new(1)).await.unwrap(),
            ClaimOutcome::Claimed
        );
        assert_eq!(store.snapshot(COUPON).unwrap().available_today(), 1);
    }

    #[tokio::test]
    async fn exhausted_quota_is_out_of_stock() {
        let (coordinator, store, _ledger) = setup();
        store.seed(COUPON, 3, 0, Some(today())).unwrap();

        assert_eq!(
            coordinator.claim_one(COUPON, UserId::new(1)).await.unwrap(),
            ClaimOutcome::OutOfStock
        );
        assert_eq!(store.snapshot(COUPON).unwrap().available_today(), 0);
    }

    #[tokio::test]
    async fn zero_daily_limit_is_always_out_of_stock() {
        let (coordinator, store, _ledger) = setup();
        store.seed(COUPON, 0, 0, Some(yesterday())).unwrap();

        assert_eq!(
            coordinator.claim_one(COUPON, UserId::new(1)).await.unwrap(),
            ClaimOutcome::OutOfStock
        );
    }

    #[tokio::test]
    async fn retry_exhaustion_reports_out_of_stock() {
        let (coordinator, store, _ledger) = setup();
        store.seed(COUPON, 3, 3, Some(today())).unwrap();
        store.inject_conflicts(5);

        assert_eq!(
            coordinator.claim_one(COUPON, UserId::new(1)).await.unwrap(),
            ClaimOutcome::OutOfStock
        );
        assert_eq!(store.snapshot(COUPON).unwrap().available_today(), 3);
    }

    #[tokio::test]
    async fn claim_succeeds_on_last_attempt() {
        let (coordinator, store, _ledger) = setup();
        store.seed(COUPON, 3, 3, Some(today())).unwrap();
        store.inject_conflicts(4);

        assert_eq!(
            coordinator.claim_one(COUPON, UserId::new(1)).await.unwrap(),
            ClaimOutcome::Claimed
        );
        assert_eq!(store.snapshot(COUPON).unwrap().available_today(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_policy_waits_between_attempts() {
        let (coordinator, store, _ledger) = setup();
        let coordinator = coordinator.with_policy(
            ClaimRetryPolicy::builder()
                .max_attempts(3)
                .initial_backoff(std::time::Duration::from_millis(10))
                .jitter(false)
                .build(),
        );
        store.seed(COUPON, 1, 1, Some(today())).unwrap();
        store.inject_conflicts(2);

        let started = tokio::time::Instant::now();
        assert_eq!(
            coordinator.claim_one(COUPON, UserId::new(1)).await.unwrap(),
            ClaimOutcome::Claimed
        );
        assert!(started.elapsed() >= std::time::Duration::from_millis(30));
    }

    #[tokio::test]
    async fn unavailable_store_is_an_error_not_out_of_stock() {
        let (coordinator, store, _ledger) = setup();
        store.seed(COUPON, 3, 3, Some(today())).unwrap();
        store.set_unavailable(true);

        let error = coordinator.claim_one(COUPON, UserId::new(1)).await.unwrap_err();
        assert!(matches!(
            error,
            ClaimError::Inventory(InventoryError::StoreUnavailable(_))
        ));
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn unavailable_ledger_is_an_error() {
        let (coordinator, store, ledger) = setup();
        store.seed(COUPON, 3, 3, Some(today())).unwrap();
        ledger.set_unavailable(true);

        let error = coordinator.claim_one(COUPON, UserId::new(1)).await.unwrap_err();
        assert!(matches!(error, ClaimError::Ledger(LedgerError::StoreUnavailable(_))));
        assert_eq!(store.snapshot(COUPON).unwrap().available_today(), 3);
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let (coordinator, _store, _ledger) = setup();

        let error = coordinator.claim_one(COUPON, UserId::new(1)).await.unwrap_err();
        assert!(matches!(
            error,
            ClaimError::Inventory(InventoryError::NotFound(id)) if id == COUPON
        ));
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn day_boundary_follows_business_offset() {
        // 15:30 UTC on Jan 1 is 00:30 on Jan 2 in UTC+9.
        let now = test_instant() + Duration::hours(15) + Duration::minutes(30);
        let (coordinator, store, _ledger) = coordinator_at(now);
        store.seed(COUPON, 2, 0, Some(today())).unwrap();

        assert_eq!(
            coordinator.claim_one(COUPON, UserId::new(1)).await.unwrap(),
            ClaimOutcome::Claimed
        );
        let record = store.snapshot(COUPON).unwrap();
        assert_eq!(record.last_reset_date(), NaiveDate::from_ymd_opt(2025, 1, 2));

        let (utc_coordinator, utc_store, _ledger) = coordinator_at(now);
        let utc_coordinator = utc_coordinator.with_offset(FixedOffset::east_opt(0).unwrap());
        utc_store.seed(COUPON, 2, 0, Some(today())).unwrap();
        assert_eq!(
            utc_coordinator.claim_one(COUPON, UserId::new(1)).await.unwrap(),
            ClaimOutcome::OutOfStock
        );
    }

    proptest::proptest! {
        #[test]
        fn sequential_claims_drain_exactly_the_effective_stock(
            (limit, counter) in coupon_inventory_testing::properties::limit_and_counter()
        ) {
            // 2025-03-15 21:00 in KST, so March dates fall on both sides of today
            let now = DateTime::parse_from_rfc3339("2025-03-15T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc);
            let (coordinator, store, _ledger) = coordinator_at(now);
            let record = store
                .seed(COUPON, limit, counter.available_today, counter.last_reset_date)
                .unwrap();
            let expected = reset_if_needed(record, coordinator.today()).available_today();

            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let claimed = runtime.block_on(async {
                let mut claimed = 0u32;
                for user in 0.. {
                    match coordinator.claim_one(COUPON, UserId::new(user)).await.unwrap() {
                        ClaimOutcome::Claimed => claimed += 1,
                        _ => break,
                    }
                }
                claimed
            });

            proptest::prop_assert_eq!(claimed, expected);
            proptest::prop_assert_eq!(store.snapshot(COUPON).unwrap().available_today(), 0);
        }
    }
}
