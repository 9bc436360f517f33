//! Inventory record store abstraction.
//!
//! The store owns no business logic beyond the daily reset rule it must apply
//! atomically. Its one contended operation, [`InventoryStore::compare_and_decrement`],
//! is a compare-and-swap at the storage layer: correctness of the daily count
//! across any number of server processes rests on it.
//!
//! # Implementations
//!
//! - `PostgresInventoryStore` (in `coupon-inventory-postgres`): a single conditional `UPDATE`
//! - `InMemoryInventoryStore` (in `coupon-inventory-testing`): per-process map for tests
//!
//! # Dyn Compatibility
//!
//! Methods return boxed futures instead of using `async fn` so that the claim
//! path can hold an `Arc<dyn InventoryStore>`.

use crate::error::Result;
use crate::inventory::{Counter, InventoryRecord};
use crate::types::CouponId;
use chrono::NaiveDate;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store and ledger methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of a conditional decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decrement {
    /// The persisted counter matched and now holds one unit less.
    Applied,
    /// The persisted counter changed since it was read, or had nothing left.
    ///
    /// Not an error: the caller re-reads and decides again.
    Conflict,
}

/// Persistent per-coupon daily counters.
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// concurrent claim in the process, and several processes may share the same
/// backing storage.
pub trait InventoryStore: Send + Sync {
    /// Load the inventory record for a coupon.
    ///
    /// # Errors
    ///
    /// - `NotFound`: the coupon has no inventory record
    /// - `StoreUnavailable`: storage failure
    fn get(&self, coupon_id: CouponId) -> StoreFuture<'_, Result<InventoryRecord>>;

    /// Create the inventory record for a newly defined coupon.
    ///
    /// The record starts unused (`available_today = 0`, no reset date); the
    /// first claim refills it.
    ///
    /// # Errors
    ///
    /// - `AlreadyExists`: the coupon already has a record
    /// - `StoreUnavailable`: storage failure
    fn create(
        &self,
        coupon_id: CouponId,
        daily_limit: u32,
    ) -> StoreFuture<'_, Result<InventoryRecord>>;

    /// Atomically consume one unit if the persisted counter still equals `expected`.
    ///
    /// On a match the store persists the counter obtained by applying the
    /// daily reset policy for `today` to `expected` and removing one unit, so
    /// a lazy refill is written in the same step as the decrement. If that
    /// counter has no unit left the result is [`Decrement::Conflict`]; the
    /// stored value is never driven below zero.
    ///
    /// # Errors
    ///
    /// - `NotFound`: the coupon has no inventory record
    /// - `StoreUnavailable`: storage failure
    fn compare_and_decrement(
        &self,
        coupon_id: CouponId,
        expected: Counter,
        today: NaiveDate,
    ) -> StoreFuture<'_, Result<Decrement>>;

    /// Give one unit back after a claim could not be turned into a grant.
    ///
    /// Only succeeds while the record is still on `today` and below its
    /// limit; a unit consumed yesterday is not carried into a refilled day.
    ///
    /// # Errors
    ///
    /// - `NotFound`: the coupon has no inventory record
    /// - `StoreUnavailable`: storage failure
    fn release_one(&self, coupon_id: CouponId, today: NaiveDate) -> StoreFuture<'_, Result<bool>>;

    /// Count records whose counter belongs to a day before `today`.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on storage failure.
    fn count_due_for_reset(&self, today: NaiveDate) -> StoreFuture<'_, Result<u64>>;

    /// Refill every record whose counter belongs to a day before `today`.
    ///
    /// Returns the number of records refilled. Running it again for the same
    /// `today` refills nothing.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on storage failure.
    fn reset_all(&self, today: NaiveDate) -> StoreFuture<'_, Result<u64>>;
}
