//! `PostgreSQL` backend for coupon inventory.
//!
//! This crate provides the production implementations of the storage traits
//! from `coupon-inventory-core`:
//!
//! - [`PostgresInventoryStore`]: daily counters, with the claim's
//!   compare-and-decrement as one conditional `UPDATE`
//! - [`PostgresGrantLedger`]: user grants, with a partial unique index that
//!   allows one live grant per user and coupon
//!
//! Both share a connection pool. Several service instances may point at the
//! same database; no process-local lock is involved in any write.
//!
//! # Example
//!
//! ```ignore
//! use coupon_inventory_postgres::{PostgresGrantLedger, PostgresInventoryStore, migrate};
//!
//! let pool = sqlx::PgPool::connect("postgres://localhost/coupons").await?;
//! migrate(&pool).await?;
//!
//! let store = PostgresInventoryStore::new(pool.clone());
//! let ledger = PostgresGrantLedger::new(pool);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use sqlx::PgPool;

mod inventory;
mod ledger;

pub use inventory::PostgresInventoryStore;
pub use ledger::PostgresGrantLedger;

/// Create or update the `coupon_inventory` and `user_coupon_grants` tables.
///
/// # Errors
///
/// Returns the migrator's error if a migration fails to apply.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Coupon inventory migrations applied");
    Ok(())
}

/// Whether `error` is a unique-constraint violation.
fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Log and count a failed statement, returning its message.
fn store_failure(store: &'static str, operation: &'static str, error: &sqlx::Error) -> String {
    tracing::warn!(store, operation, %error, "Storage statement failed");
    metrics::counter!(
        "coupon_store_errors_total",
        "store" => store,
        "operation" => operation
    )
    .increment(1);
    format!("{operation} failed: {error}")
}
