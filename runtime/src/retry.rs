//! Bounded retry policy for contended inventory claims.
//!
//! A claim that loses the compare-and-decrement race re-reads the record and
//! tries again. The contention window is a single conditional update, so the
//! default policy retries immediately; a small jittered backoff can be enabled
//! to spread a thundering herd on very hot coupons.
//!
//! # Example
//!
//! ```rust
//! use coupon_inventory_runtime::retry::ClaimRetryPolicy;
//! use std::time::Duration;
//!
//! let policy = ClaimRetryPolicy::builder()
//!     .max_attempts(8)
//!     .initial_backoff(Duration::from_millis(2))
//!     .max_backoff(Duration::from_millis(20))
//!     .build();
//!
//! assert_eq!(policy.max_attempts, 8);
//! ```

use rand::Rng;
use std::time::Duration;

/// Retry policy for the claim path.
///
/// # Default Values
///
/// - `max_attempts`: 5
/// - `initial_backoff`: zero (retry immediately)
/// - `max_backoff`: 50ms
/// - `multiplier`: 2.0
/// - `jitter`: true
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimRetryPolicy {
    /// Total compare-and-decrement attempts per claim (at least 1)
    pub max_attempts: usize,
    /// Delay before the first retry; zero disables backoff entirely
    pub initial_backoff: Duration,
    /// Cap for exponential backoff
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Pick a uniform random delay in `[0, computed]` instead of the computed delay
    pub jitter: bool,
}

impl Default for ClaimRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::from_millis(50),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ClaimRetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> ClaimRetryPolicyBuilder {
        ClaimRetryPolicyBuilder {
            max_attempts: None,
            initial_backoff: None,
            max_backoff: None,
            multiplier: None,
            jitter: None,
        }
    }

    /// Upper bound of the delay before retry number `retry` (0-based).
    ///
    /// Uses exponential backoff: `initial_backoff * multiplier ^ retry`,
    /// capped at `max_backoff`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn ceiling_for_retry(&self, retry: usize) -> Duration {
        if self.initial_backoff.is_zero() {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let delay_ms = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let delay = Duration::from_millis(delay_ms.min(u64::MAX as f64) as u64);

        delay.min(self.max_backoff)
    }

    /// Delay to wait before retry number `retry`, with jitter applied.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn delay_for_retry(&self, retry: usize) -> Duration {
        let ceiling = self.ceiling_for_retry(retry);
        if !self.jitter || ceiling.is_zero() {
            return ceiling;
        }
        let ceiling_us = ceiling.as_micros().min(u128::from(u64::MAX)) as u64;
        Duration::from_micros(rand::thread_rng().gen_range(0..=ceiling_us))
    }
}

/// Builder for [`ClaimRetryPolicy`].
#[derive(Debug, Clone)]
pub struct ClaimRetryPolicyBuilder {
    max_attempts: Option<usize>,
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<bool>,
}

impl ClaimRetryPolicyBuilder {
    /// Set the total number of attempts per claim.
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub const fn initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = Some(delay);
        self
    }

    /// Set the backoff cap.
    #[must_use]
    pub const fn max_backoff(mut self, delay: Duration) -> Self {
        self.max_backoff = Some(delay);
        self
    }

    /// Set the exponential multiplier.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Build the [`ClaimRetryPolicy`].
    ///
    /// `max_attempts` is raised to 1 if set to zero; a claim always makes at
    /// least one attempt.
    #[must_use]
    pub fn build(self) -> ClaimRetryPolicy {
        let defaults = ClaimRetryPolicy::default();
        ClaimRetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            initial_backoff: self.initial_backoff.unwrap_or(defaults.initial_backoff),
            max_backoff: self.max_backoff.unwrap_or(defaults.max_backoff),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
            jitter: self.jitter.unwrap_or(defaults.jitter),
        }
    }
}
