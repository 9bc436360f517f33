//! # Coupon Inventory Runtime
//!
//! The moving parts on top of the storage traits in `coupon-inventory-core`.
//!
//! ## Core Components
//!
//! - **`ClaimCoordinator`**: takes one unit of a coupon's daily quota through
//!   the store's compare-and-decrement, with bounded retries
//! - **`CouponIssuer`**: turns a successful claim into a grant, handing the
//!   unit back if the grant cannot be recorded
//! - **`ExpirationSweep`**: expires overdue grants and refills stale counters
//! - **`SweepScheduler`**: runs the sweep once a day at business midnight
//!
//! ## Example
//!
//! ```ignore
//! use coupon_inventory_runtime::{ClaimCoordinator, CouponIssuer, IssueOutcome};
//!
//! let coordinator = ClaimCoordinator::new(store, ledger, Arc::new(SystemClock));
//! let issuer = CouponIssuer::new(coordinator);
//!
//! match issuer.issue(coupon_id, user_id, expires_at).await? {
//!     IssueOutcome::Issued(grant) => println!("granted {}", grant.grant_id),
//!     IssueOutcome::OutOfStock => println!("sold out for today"),
//!     IssueOutcome::AlreadyClaimed => println!("already yours"),
//! }
//! ```

/// Contended claim path
pub mod coordinator;

/// Claim plus grant creation, with compensation
pub mod issuer;

/// Prometheus metrics for observability
pub mod metrics;

/// Retry policy for lost compare-and-decrement races
pub mod retry;

/// Daily timer for the sweep
pub mod scheduler;

/// Nightly grant expiry and counter refill
pub mod sweep;

pub use coordinator::{ClaimCoordinator, ClaimError, ClaimOutcome};
pub use issuer::{CouponIssuer, IssueOutcome};
pub use retry::ClaimRetryPolicy;
pub use scheduler::{DailySchedule, SweepScheduler};
pub use sweep::{ExpirationSweep, SweepError, SweepReport};
