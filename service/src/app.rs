//! Wiring of stores, issuer, and sweep scheduler from a [`Config`].

use crate::config::Config;
use coupon_inventory_core::environment::{Clock, SystemClock};
use coupon_inventory_core::ledger::GrantLedger;
use coupon_inventory_core::store::InventoryStore;
use coupon_inventory_postgres::{PostgresGrantLedger, PostgresInventoryStore};
use coupon_inventory_runtime::{ClaimCoordinator, CouponIssuer, ExpirationSweep, SweepScheduler};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;

/// Fully wired coupon inventory components.
pub struct CouponApp {
    pool: PgPool,
    issuer: CouponIssuer,
    scheduler: SweepScheduler,
}

impl CouponApp {
    /// Connect to `PostgreSQL`, run migrations, and wire everything.
    ///
    /// # Errors
    ///
    /// Returns error if the database is unreachable or migrations fail.
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.postgres.max_connections)
            .min_connections(config.postgres.min_connections)
            .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
            .connect(&config.postgres.url)
            .await?;
        tracing::info!("✓ Connected to PostgreSQL");

        coupon_inventory_postgres::migrate(&pool).await?;
        tracing::info!("✓ Migrations applied");

        Ok(Self::with_pool(config, pool, Arc::new(SystemClock)))
    }

    /// Wire components over an existing pool.
    #[must_use]
    pub fn with_pool(config: &Config, pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        let store: Arc<dyn InventoryStore> = Arc::new(PostgresInventoryStore::new(pool.clone()));
        let ledger: Arc<dyn GrantLedger> = Arc::new(PostgresGrantLedger::new(pool.clone()));
        let offset = config.business_offset();

        let coordinator =
            ClaimCoordinator::new(Arc::clone(&store), Arc::clone(&ledger), Arc::clone(&clock))
                .with_offset(offset)
                .with_policy(config.retry_policy());

        let sweep = ExpirationSweep::new(store, ledger)
            .with_offset(offset)
            .with_eager_reset(config.sweep.eager_reset);
        let scheduler = SweepScheduler::new(sweep, config.schedule(), clock)
            .with_run_on_startup(config.sweep.run_on_startup);

        Self {
            pool,
            issuer: CouponIssuer::new(coordinator),
            scheduler,
        }
    }

    /// Issuer for the booking flow.
    #[must_use]
    pub const fn issuer(&self) -> &CouponIssuer {
        &self.issuer
    }

    /// The daily sweep scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &SweepScheduler {
        &self.scheduler
    }

    /// Close the connection pool.
    pub async fn shutdown(&self) {
        self.pool.close().await;
        tracing::info!("✓ Database pool closed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use coupon_inventory_testing::{FixedClock, test_instant};
    use std::collections::HashMap;

    #[tokio::test]
    async fn wiring_applies_config() {
        let vars: HashMap<&str, &str> = [
            ("BUSINESS_UTC_OFFSET_SECONDS", "-3600"),
            ("CLAIM_MAX_ATTEMPTS", "9"),
        ]
        .into_iter()
        .collect();
        let config = Config::from_lookup(|key| vars.get(key).map(|v| (*v).to_string()));

        // Lazy pools never connect until first use
        let pool = PgPoolOptions::new()
            .connect_lazy(&config.postgres.url)
            .unwrap();
        let app = CouponApp::with_pool(&config, pool, Arc::new(FixedClock::new(test_instant())));

        assert_eq!(app.issuer().coordinator().policy().max_attempts, 9);
        // 2025-01-01T00:00Z is still New Year's Eve an hour west of UTC
        assert_eq!(
            app.issuer().coordinator().today(),
            chrono::NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
        );
    }
}
