//! Prometheus metrics for the claim path and the nightly sweep.
//!
//! Recorders are zero-sized types with associated functions; they write to
//! whichever global `metrics` recorder is installed, so unit tests that never
//! install one pay nothing.
//!
//! # Example
//!
//! ```rust,no_run
//! use coupon_inventory_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.serve()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use crate::coordinator::ClaimOutcome;
use crate::sweep::SweepReport;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Exporter setup failures.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus exporter for the coupon metrics.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a server that will listen on `addr` once [`serve`](Self::serve)d.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the HTTP listener binds to.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn builder() -> Result<PrometheusBuilder, MetricsError> {
        PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))
    }

    /// Install the recorder without an HTTP listener.
    ///
    /// Metrics can still be read through [`render`](Self::render).
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. An already
    /// installed recorder (e.g., from another test) is tolerated with a warning.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        match Self::builder()?.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!(
                        "Metrics recorder already initialized, skipping re-initialization"
                    );
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Install the recorder and serve `/metrics` on [`addr`](Self::addr).
    ///
    /// Must be called from within a Tokio runtime; the listener runs as a
    /// spawned task for the life of the process.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or a recorder is already installed.
    pub fn serve(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = Self::builder()?
            .with_http_listener(self.addr)
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();
        metrics::set_global_recorder(recorder).map_err(|e| MetricsError::Install(e.to_string()))?;

        let addr = self.addr;
        tokio::spawn(async move {
            if let Err(error) = exporter.await {
                tracing::error!(%addr, ?error, "Metrics listener stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Describe every coupon metric once, before the first sample.
fn register_metrics() {
    // Claim path
    describe_counter!(
        "coupon_claims_total",
        "Total number of claim attempts by outcome (claimed, out_of_stock, already_claimed, error)"
    );
    describe_counter!(
        "coupon_claim_conflicts_total",
        "Total number of compare-and-decrement conflicts"
    );
    describe_counter!(
        "coupon_claim_releases_total",
        "Total number of units handed back after a failed grant insert"
    );

    // Sweep
    describe_counter!(
        "coupon_grants_expired_total",
        "Total number of grants moved from active to expired"
    );
    describe_counter!(
        "coupon_inventories_reset_total",
        "Total number of inventory records refilled by the sweep"
    );
    describe_counter!(
        "coupon_sweep_runs_total",
        "Total number of sweep runs by result (ok, error)"
    );
    describe_histogram!(
        "coupon_sweep_duration_seconds",
        "Time taken by one sweep run"
    );

    // Storage
    describe_counter!(
        "coupon_store_errors_total",
        "Total number of failed storage operations by store and operation"
    );
}

/// Claim path metrics recorder.
pub struct ClaimMetrics;

impl ClaimMetrics {
    /// Record the outcome of a claim.
    pub fn record_outcome(outcome: ClaimOutcome) {
        counter!("coupon_claims_total", "outcome" => outcome.as_str()).increment(1);
    }

    /// Record a claim that ended in an error.
    pub fn record_error() {
        counter!("coupon_claims_total", "outcome" => "error").increment(1);
    }

    /// Record a lost compare-and-decrement race.
    pub fn record_conflict() {
        counter!("coupon_claim_conflicts_total").increment(1);
    }

    /// Record a compensating release.
    pub fn record_release() {
        counter!("coupon_claim_releases_total").increment(1);
    }
}

/// Sweep metrics recorder.
pub struct SweepMetrics;

impl SweepMetrics {
    /// Record a completed sweep run.
    pub fn record_run(report: &SweepReport, duration: Duration) {
        counter!("coupon_sweep_runs_total", "result" => "ok").increment(1);
        counter!("coupon_grants_expired_total").increment(report.expired);
        counter!("coupon_inventories_reset_total").increment(report.reset);
        histogram!("coupon_sweep_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed sweep run.
    pub fn record_failure(duration: Duration) {
        counter!("coupon_sweep_runs_total", "result" => "error").increment(1);
        histogram!("coupon_sweep_duration_seconds").record(duration.as_secs_f64());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn unstarted_server_renders_nothing() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn start_tolerates_existing_recorder() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());

        // handle stays None if another test already installed the recorder
        assert!(server.start().is_ok());
    }

    #[test]
    fn recorders_without_installed_recorder_are_noops() {
        ClaimMetrics::record_outcome(ClaimOutcome::Claimed);
        ClaimMetrics::record_conflict();
        ClaimMetrics::record_error();
        ClaimMetrics::record_release();
        SweepMetrics::record_run(&SweepReport::default(), Duration::from_millis(3));
        SweepMetrics::record_failure(Duration::from_millis(1));
    }
}
