//! Expiration sweep: the nightly batch over grants and inventory records.
//!
//! The sweep is a function of persisted state and the instant it is given.
//! It keeps no state of its own, so any instance may run it and running it
//! twice for the same instant changes nothing the second time.

use crate::metrics::SweepMetrics;
use chrono::{DateTime, FixedOffset, Utc};
use coupon_inventory_core::environment::{business_date, default_business_offset};
use coupon_inventory_core::error::{InventoryError, LedgerError};
use coupon_inventory_core::ledger::GrantLedger;
use coupon_inventory_core::store::InventoryStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Counts from one sweep run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Grants moved from `ACTIVE` to `EXPIRED`
    pub expired: u64,
    /// Inventory records whose counter belonged to an earlier day
    pub due_for_reset: u64,
    /// Inventory records refilled by this run
    pub reset: u64,
}

/// A sweep step failed. Steps that already ran stay applied.
#[derive(Error, Debug)]
pub enum SweepError {
    /// Expiring grants failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Counting or refilling inventory failed.
    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

/// Expires overdue grants and refills stale inventory counters.
#[derive(Clone)]
pub struct ExpirationSweep {
    store: Arc<dyn InventoryStore>,
    ledger: Arc<dyn GrantLedger>,
    offset: FixedOffset,
    eager_reset: bool,
}

impl ExpirationSweep {
    /// Create a sweep that refills stale counters eagerly.
    #[must_use]
    pub fn new(store: Arc<dyn InventoryStore>, ledger: Arc<dyn GrantLedger>) -> Self {
        Self {
            store,
            ledger,
            offset: default_business_offset(),
            eager_reset: true,
        }
    }

    /// Use `offset` to decide which business day `now` falls on.
    #[must_use]
    pub const fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    /// Whether to refill stale counters, or only count them and leave the
    /// refill to the first claim of the day.
    #[must_use]
    pub const fn with_eager_reset(mut self, eager_reset: bool) -> Self {
        self.eager_reset = eager_reset;
        self
    }

    /// Run one sweep as of `now`.
    ///
    /// # Errors
    ///
    /// Returns the first failing step. Grants expired before the failure stay
    /// expired; the next run picks up whatever is left.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<SweepReport, SweepError> {
        let started = Instant::now();
        let result = self.sweep(now).await;

        match &result {
            Ok(report) => {
                SweepMetrics::record_run(report, started.elapsed());
                tracing::info!(
                    expired = report.expired,
                    due_for_reset = report.due_for_reset,
                    reset = report.reset,
                    %now,
                    "Expiration sweep completed"
                );
            }
            Err(error) => {
                SweepMetrics::record_failure(started.elapsed());
                tracing::error!(%error, %now, "Expiration sweep failed");
            }
        }
        result
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, SweepError> {
        let today = business_date(now, self.offset);

        let expired = self.ledger.expire_overdue(now).await?;
        let due_for_reset = self.store.count_due_for_reset(today).await?;
        let reset = if self.eager_reset && due_for_reset > 0 {
            self.store.reset_all(today).await?
        } else {
            0
        };

        Ok(SweepReport {
            expired,
            due_for_reset,
            reset,
        })
    }
}
