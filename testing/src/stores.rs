//! In-memory inventory store and grant ledger.
//!
//! Fast, deterministic stand-ins for the `PostgreSQL` implementations:
//! - [`InMemoryInventoryStore`]: map of inventory records behind one mutex
//! - [`InMemoryGrantLedger`]: ordered map of grants behind one mutex
//!
//! Both are `Clone` and share state across clones, so a test can keep a
//! handle for assertions while the code under test owns another. Both support
//! fault injection (`set_unavailable`, `inject_conflicts`, `fail_inserts`) to
//! exercise error paths.
//!
//! The conditional decrement runs entirely under the lock, which makes it a
//! true compare-and-swap for every task in the process. Reads yield to the
//! scheduler after copying the record out, widening the window in which
//! concurrent claims observe stale counters.

use chrono::{DateTime, NaiveDate, Utc};
use coupon_inventory_core::error::{InventoryError, LedgerError, LedgerResult, Result};
use coupon_inventory_core::grant::{GrantStatus, NewGrant, UserCouponGrant};
use coupon_inventory_core::inventory::{Counter, InventoryRecord};
use coupon_inventory_core::ledger::GrantLedger;
use coupon_inventory_core::store::{Decrement, InventoryStore, StoreFuture};
use coupon_inventory_core::types::{CouponId, GrantId, InventoryId, UserId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

#[derive(Debug, Default)]
struct InventoryState {
    records: HashMap<CouponId, InventoryRecord>,
    next_id: i64,
    injected_conflicts: u32,
    unavailable: bool,
}

/// In-memory inventory record store for fast, deterministic testing.
///
/// # Example
///
/// ```
/// use coupon_inventory_testing::InMemoryInventoryStore;
/// use coupon_inventory_core::store::InventoryStore;
/// use coupon_inventory_core::types::CouponId;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryInventoryStore::new();
/// store.create(CouponId::new(1), 100).await?;
///
/// let record = store.get(CouponId::new(1)).await?;
/// assert_eq!(record.daily_limit(), 100);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryInventoryStore {
    state: Arc<Mutex<InventoryState>>,
}

impl InMemoryInventoryStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, InventoryState>> {
        let guard = self
            .state
            .lock()
            .map_err(|_| InventoryError::StoreUnavailable("Mutex lock failed".into()))?;
        if guard.unavailable {
            return Err(InventoryError::StoreUnavailable(
                "in-memory store marked unavailable".into(),
            ));
        }
        Ok(guard)
    }

    /// Insert or replace a record with an arbitrary counter.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::InvalidCounter`] if the counter exceeds the limit.
    pub fn seed(
        &self,
        coupon_id: CouponId,
        daily_limit: u32,
        available_today: u32,
        last_reset_date: Option<NaiveDate>,
    ) -> Result<InventoryRecord> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let record = InventoryRecord::new(InventoryId::new(state.next_id), coupon_id, daily_limit)
            .with_counter(available_today, last_reset_date)?;
        state.records.insert(coupon_id, record.clone());
        Ok(record)
    }

    /// Current record for a coupon, bypassing fault injection.
    #[must_use]
    pub fn snapshot(&self, coupon_id: CouponId) -> Option<InventoryRecord> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.records.get(&coupon_id).cloned())
    }

    /// Make every operation fail with `StoreUnavailable` until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.unavailable = unavailable;
        }
    }

    /// Make the next `n` conditional decrements report a conflict.
    pub fn inject_conflicts(&self, n: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.injected_conflicts = n;
        }
    }

    fn read(&self, coupon_id: CouponId) -> Result<InventoryRecord> {
        self.lock()?
            .records
            .get(&coupon_id)
            .cloned()
            .ok_or(InventoryError::NotFound(coupon_id))
    }

    fn decrement(
        &self,
        coupon_id: CouponId,
        expected: Counter,
        today: NaiveDate,
    ) -> Result<Decrement> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let record = state
            .records
            .get_mut(&coupon_id)
            .ok_or(InventoryError::NotFound(coupon_id))?;

        if state.injected_conflicts > 0 {
            state.injected_conflicts -= 1;
            return Ok(Decrement::Conflict);
        }
        if record.counter() != expected {
            return Ok(Decrement::Conflict);
        }

        let Some(next) = expected.reset_if_needed(record.daily_limit(), today).take_one() else {
            return Ok(Decrement::Conflict);
        };
        *record = record
            .clone()
            .with_counter(next.available_today, next.last_reset_date)?;
        Ok(Decrement::Applied)
    }

    fn release(&self, coupon_id: CouponId, today: NaiveDate) -> Result<bool> {
        let mut state = self.lock()?;
        let record = state
            .records
            .get_mut(&coupon_id)
            .ok_or(InventoryError::NotFound(coupon_id))?;

        if record.last_reset_date() != Some(today)
            || record.available_today() >= record.daily_limit()
        {
            return Ok(false);
        }
        *record = record
            .clone()
            .with_counter(record.available_today() + 1, Some(today))?;
        Ok(true)
    }

    fn refill_all(&self, today: NaiveDate) -> Result<u64> {
        let mut state = self.lock()?;
        let mut refilled = 0;
        for record in state.records.values_mut() {
            if record.counter().needs_reset(today) {
                *record = coupon_inventory_core::inventory::reset_if_needed(record.clone(), today);
                refilled += 1;
            }
        }
        Ok(refilled)
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn get(&self, coupon_id: CouponId) -> StoreFuture<'_, Result<InventoryRecord>> {
        Box::pin(async move {
            let record = self.read(coupon_id)?;
            tokio::task::yield_now().await;
            Ok(record)
        })
    }

    fn create(
        &self,
        coupon_id: CouponId,
        daily_limit: u32,
    ) -> StoreFuture<'_, Result<InventoryRecord>> {
        Box::pin(async move {
            let mut state = self.lock()?;
            if state.records.contains_key(&coupon_id) {
                return Err(InventoryError::AlreadyExists(coupon_id));
            }
            state.next_id += 1;
            let record =
                InventoryRecord::new(InventoryId::new(state.next_id), coupon_id, daily_limit);
            state.records.insert(coupon_id, record.clone());
            Ok(record)
        })
    }

    fn compare_and_decrement(
        &self,
        coupon_id: CouponId,
        expected: Counter,
        today: NaiveDate,
    ) -> StoreFuture<'_, Result<Decrement>> {
        Box::pin(async move { self.decrement(coupon_id, expected, today) })
    }

    fn release_one(&self, coupon_id: CouponId, today: NaiveDate) -> StoreFuture<'_, Result<bool>> {
        Box::pin(async move { self.release(coupon_id, today) })
    }

    fn count_due_for_reset(&self, today: NaiveDate) -> StoreFuture<'_, Result<u64>> {
        Box::pin(async move {
            let state = self.lock()?;
            Ok(count(
                state
                    .records
                    .values()
                    .filter(|record| record.counter().needs_reset(today))
                    .count(),
            ))
        })
    }

    fn reset_all(&self, today: NaiveDate) -> StoreFuture<'_, Result<u64>> {
        Box::pin(async move { self.refill_all(today) })
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    grants: BTreeMap<GrantId, UserCouponGrant>,
    next_id: i64,
    fail_inserts: bool,
    unavailable: bool,
}

/// In-memory grant ledger for fast, deterministic testing.
///
/// Enforces the same uniqueness rule as the `PostgreSQL` partial index: at
/// most one `ACTIVE` or `USED` grant per user and coupon.
#[derive(Clone, Debug, Default)]
pub struct InMemoryGrantLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryGrantLedger {
    /// Create a new empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> LedgerResult<MutexGuard<'_, LedgerState>> {
        let guard = self
            .state
            .lock()
            .map_err(|_| LedgerError::StoreUnavailable("Mutex lock failed".into()))?;
        if guard.unavailable {
            return Err(LedgerError::StoreUnavailable(
                "in-memory ledger marked unavailable".into(),
            ));
        }
        Ok(guard)
    }

    /// Make every operation fail with `StoreUnavailable` until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.unavailable = unavailable;
        }
    }

    /// Make `insert` fail with `StoreUnavailable` until cleared.
    pub fn fail_inserts(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_inserts = fail;
        }
    }

    /// Number of grants recorded
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().map(|state| state.grants.len()).unwrap_or(0)
    }

    /// Whether no grants are recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of grants in `status`
    #[must_use]
    pub fn count_in(&self, status: GrantStatus) -> usize {
        self.state
            .lock()
            .map(|state| state.grants.values().filter(|g| g.status == status).count())
            .unwrap_or(0)
    }

    /// Insert a grant with an explicit status, bypassing uniqueness checks.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the ledger is marked unavailable.
    pub fn seed(&self, new: NewGrant, status: GrantStatus) -> LedgerResult<UserCouponGrant> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let mut grant = UserCouponGrant::issue(GrantId::new(state.next_id), new);
        grant.status = status;
        if status == GrantStatus::Used {
            grant.used_at = Some(grant.issued_at);
        }
        state.grants.insert(grant.grant_id, grant.clone());
        Ok(grant)
    }

    fn update<F>(&self, grant_id: GrantId, apply: F) -> LedgerResult<UserCouponGrant>
    where
        F: FnOnce(&mut UserCouponGrant) -> LedgerResult<()>,
    {
        let mut state = self.lock()?;
        let grant = state
            .grants
            .get_mut(&grant_id)
            .ok_or(LedgerError::GrantNotFound(grant_id))?;
        let mut next = grant.clone();
        apply(&mut next)?;
        *grant = next.clone();
        Ok(next)
    }
}

impl GrantLedger for InMemoryGrantLedger {
    fn has_claimed(
        &self,
        user_id: UserId,
        coupon_id: CouponId,
    ) -> StoreFuture<'_, LedgerResult<bool>> {
        Box::pin(async move {
            let state = self.lock()?;
            Ok(state.grants.values().any(|g| {
                g.user_id == user_id && g.coupon_id == coupon_id && g.status.holds_claim()
            }))
        })
    }

    fn insert(&self, new: NewGrant) -> StoreFuture<'_, LedgerResult<UserCouponGrant>> {
        Box::pin(async move {
            let mut state = self.lock()?;
            if state.fail_inserts {
                return Err(LedgerError::StoreUnavailable("injected insert failure".into()));
            }
            let duplicate = state.grants.values().any(|g| {
                g.user_id == new.user_id && g.coupon_id == new.coupon_id && g.status.holds_claim()
            });
            if duplicate {
                return Err(LedgerError::Duplicate {
                    user_id: new.user_id,
                    coupon_id: new.coupon_id,
                });
            }
            state.next_id += 1;
            let grant = UserCouponGrant::issue(GrantId::new(state.next_id), new);
            state.grants.insert(grant.grant_id, grant.clone());
            Ok(grant)
        })
    }

    fn get(&self, grant_id: GrantId) -> StoreFuture<'_, LedgerResult<UserCouponGrant>> {
        Box::pin(async move {
            self.lock()?
                .grants
                .get(&grant_id)
                .cloned()
                .ok_or(LedgerError::GrantNotFound(grant_id))
        })
    }

    fn list_for_user(
        &self,
        user_id: UserId,
        status: GrantStatus,
    ) -> StoreFuture<'_, LedgerResult<Vec<UserCouponGrant>>> {
        Box::pin(async move {
            let state = self.lock()?;
            let mut grants: Vec<_> = state
                .grants
                .values()
                .filter(|g| g.user_id == user_id && g.status == status)
                .cloned()
                .collect();
            grants.sort_by(|a, b| b.issued_at.cmp(&a.issued_at).then(b.grant_id.cmp(&a.grant_id)));
            Ok(grants)
        })
    }

    fn mark_used(
        &self,
        grant_id: GrantId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, LedgerResult<UserCouponGrant>> {
        Box::pin(async move { self.update(grant_id, |g| g.mark_used(user_id, now)) })
    }

    fn restore(
        &self,
        grant_id: GrantId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, LedgerResult<UserCouponGrant>> {
        Box::pin(async move { self.update(grant_id, |g| g.restore(user_id, now)) })
    }

    fn expire_overdue(&self, now: DateTime<Utc>) -> StoreFuture<'_, LedgerResult<u64>> {
        Box::pin(async move {
            let mut state = self.lock()?;
            let mut expired = 0;
            for grant in state.grants.values_mut() {
                if grant.should_expire(now) {
                    grant.status = GrantStatus::Expired;
                    expired += 1;
                }
            }
            Ok(expired)
        })
    }
}
