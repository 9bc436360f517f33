//! # Coupon Inventory Service
//!
//! Process wiring for the coupon inventory: configuration from the
//! environment, a `PostgreSQL` pool, the claim-side [`CouponIssuer`], and the
//! daily [`SweepScheduler`] that the `coupon-sweeper` binary runs.
//!
//! [`CouponIssuer`]: coupon_inventory_runtime::CouponIssuer
//! [`SweepScheduler`]: coupon_inventory_runtime::SweepScheduler

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod config;

pub use app::CouponApp;
pub use config::Config;
