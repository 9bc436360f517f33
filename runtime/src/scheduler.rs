//! Daily timer that drives the [`ExpirationSweep`].
//!
//! The schedule is a local wall-clock time at a fixed UTC offset, so the sweep
//! runs at business midnight regardless of the host's timezone.

use crate::sweep::{ExpirationSweep, SweepError, SweepReport};
use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveTime, TimeDelta, Utc};
use coupon_inventory_core::environment::{Clock, default_business_offset};
use std::sync::Arc;
use tokio::sync::watch;

/// A time of day at a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    at: NaiveTime,
    offset: FixedOffset,
}

impl DailySchedule {
    /// Fire every day at `at`, local to `offset`.
    #[must_use]
    pub const fn new(at: NaiveTime, offset: FixedOffset) -> Self {
        Self { at, offset }
    }

    /// Business midnight at the default offset.
    #[must_use]
    pub fn midnight() -> Self {
        Self::new(NaiveTime::default(), default_business_offset())
    }

    /// Local time of day the schedule fires at.
    #[must_use]
    pub const fn at(&self) -> NaiveTime {
        self.at
    }

    /// UTC offset the time of day is read in.
    #[must_use]
    pub const fn offset(&self) -> FixedOffset {
        self.offset
    }

    fn fire_on(&self, date: NaiveDate) -> DateTime<Utc> {
        let local = date.and_time(self.at);
        (local - TimeDelta::seconds(i64::from(self.offset.local_minus_utc()))).and_utc()
    }

    /// First fire instant strictly after `instant`.
    #[must_use]
    pub fn next_fire_after(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let local_date = instant.with_timezone(&self.offset).date_naive();
        let candidate = self.fire_on(local_date);
        if candidate > instant {
            return candidate;
        }
        let tomorrow = local_date.checked_add_days(Days::new(1)).unwrap_or(NaiveDate::MAX);
        self.fire_on(tomorrow)
    }
}

/// Runs the sweep once per [`DailySchedule`] until told to stop.
pub struct SweepScheduler {
    sweep: ExpirationSweep,
    schedule: DailySchedule,
    clock: Arc<dyn Clock>,
    run_on_startup: bool,
}

impl SweepScheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new(sweep: ExpirationSweep, schedule: DailySchedule, clock: Arc<dyn Clock>) -> Self {
        Self {
            sweep,
            schedule,
            clock,
            run_on_startup: false,
        }
    }

    /// Also run one sweep immediately when [`run`](Self::run) starts.
    #[must_use]
    pub const fn with_run_on_startup(mut self, run_on_startup: bool) -> Self {
        self.run_on_startup = run_on_startup;
        self
    }

    /// Run one sweep now.
    ///
    /// # Errors
    ///
    /// Propagates the sweep's failure.
    pub async fn run_once(&self) -> Result<SweepReport, SweepError> {
        self.sweep.run(self.clock.now()).await
    }

    async fn sweep_until_next_fire(&self) {
        if let Err(error) = self.run_once().await {
            tracing::debug!(%error, "Sweep will be retried at the next fire");
        }
    }

    /// Sleep until each fire instant and sweep, until `shutdown` turns `true`
    /// or its sender is dropped.
    ///
    /// A failed run is logged by the sweep and retried at the next fire.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            at = %self.schedule.at,
            offset = %self.schedule.offset,
            "Sweep scheduler started"
        );

        if self.run_on_startup {
            self.sweep_until_next_fire().await;
        }

        let mut after = self.clock.now();
        while !*shutdown.borrow() {
            let next = self.schedule.next_fire_after(after);
            let wait = (next - self.clock.now()).to_std().unwrap_or_default();
            tracing::debug!(
                next_run = %next,
                wait_secs = wait.as_secs(),
                "Next expiration sweep scheduled"
            );

            tokio::select! {
                () = tokio::time::sleep(wait) => {
                    self.sweep_until_next_fire().await;
                    after = self.clock.now().max(next);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Sweep scheduler stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use coupon_inventory_core::grant::{GrantStatus, NewGrant};
    use coupon_inventory_core::ledger::GrantLedger;
    use coupon_inventory_core::types::{CouponId, UserId};
    use coupon_inventory_testing::{FixedClock, InMemoryGrantLedger, InMemoryInventoryStore};
    use std::time::Duration;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn kst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    #[test]
    fn midnight_kst_is_fifteen_hundred_utc() {
        let schedule = DailySchedule::midnight();
        assert_eq!(
            schedule.next_fire_after(utc("2025-01-01T03:00:00Z")),
            utc("2025-01-01T15:00:00Z")
        );
    }

    #[test]
    fn fire_instant_itself_schedules_the_next_day() {
        let schedule = DailySchedule::midnight();
        assert_eq!(
            schedule.next_fire_after(utc("2025-01-01T15:00:00Z")),
            utc("2025-01-02T15:00:00Z")
        );
    }

    #[test]
    fn late_local_evening_rolls_to_next_local_day() {
        let schedule = DailySchedule::new(NaiveTime::from_hms_opt(3, 30, 0).unwrap(), kst());
        // 20:00 UTC Jan 1 is 05:00 Jan 2 in UTC+9; 03:30 Jan 2 local has passed.
        assert_eq!(
            schedule.next_fire_after(utc("2025-01-01T20:00:00Z")),
            utc("2025-01-02T18:30:00Z")
        );
    }

    #[test]
    fn negative_offset_schedule() {
        let schedule =
            DailySchedule::new(NaiveTime::default(), FixedOffset::west_opt(5 * 3600).unwrap());
        assert_eq!(
            schedule.next_fire_after(utc("2025-03-10T02:00:00Z")),
            utc("2025-03-10T05:00:00Z")
        );
    }

    fn scheduler_at(now: DateTime<Utc>) -> (SweepScheduler, InMemoryGrantLedger) {
        let ledger = InMemoryGrantLedger::new();
        let sweep = ExpirationSweep::new(
            Arc::new(InMemoryInventoryStore::new()),
            Arc::new(ledger.clone()),
        );
        let scheduler =
            SweepScheduler::new(sweep, DailySchedule::midnight(), Arc::new(FixedClock::new(now)));
        (scheduler, ledger)
    }

    async fn overdue_grant(ledger: &InMemoryGrantLedger, now: DateTime<Utc>) {
        ledger
            .insert(NewGrant {
                user_id: UserId::new(1),
                coupon_id: CouponId::new(1),
                issued_at: now - TimeDelta::days(2),
                expires_at: Some(now - TimeDelta::hours(1)),
            })
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_at_fire_time_and_stops_on_shutdown() {
        let now = utc("2025-01-01T14:59:59Z");
        let (scheduler, ledger) = scheduler_at(now);
        overdue_grant(&ledger, now).await;

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { scheduler.run(rx).await });

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(ledger.count_in(GrantStatus::Expired), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ledger.count_in(GrantStatus::Expired), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn run_on_startup_sweeps_immediately() {
        let now = utc("2025-01-01T03:00:00Z");
        let (scheduler, ledger) = scheduler_at(now);
        let scheduler = scheduler.with_run_on_startup(true);
        overdue_grant(&ledger, now).await;

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { scheduler.run(rx).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ledger.count_in(GrantStatus::Expired), 1);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sweep_is_retried_at_next_fire() {
        let now = utc("2025-01-01T14:59:59Z");
        let (scheduler, ledger) = scheduler_at(now);
        let scheduler = scheduler.with_run_on_startup(true);
        overdue_grant(&ledger, now).await;
        ledger.set_unavailable(true);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { scheduler.run(rx).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        ledger.set_unavailable(false);
        assert_eq!(ledger.count_in(GrantStatus::Expired), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ledger.count_in(GrantStatus::Expired), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
